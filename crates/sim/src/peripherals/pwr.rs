// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use clockup_core::registers::pwr::{CR5_R1MODE, CR5_RESET};
use clockup_core::RegulatorMode;

const CR1: u32 = 0x00;
const CR5: u32 = 0x80;

/// Power controller. The regulator mode switch in PWR_CR5 is immediate.
#[derive(Debug, serde::Serialize)]
pub struct Pwr {
    cr1: u32,
    cr5: u32,
}

impl Default for Pwr {
    fn default() -> Self {
        Self::new()
    }
}

impl Pwr {
    pub fn new() -> Self {
        Self {
            // VOS = range 1
            cr1: 0x0000_0200,
            cr5: CR5_RESET,
        }
    }

    pub fn regulator(&self) -> RegulatorMode {
        if self.cr5 & CR5_R1MODE != 0 {
            RegulatorMode::Normal
        } else {
            RegulatorMode::Boost
        }
    }
}

impl crate::Peripheral for Pwr {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(match offset {
            CR1 => self.cr1,
            CR5 => self.cr5,
            _ => 0,
        })
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        match offset {
            CR1 => self.cr1 = value,
            CR5 => self.cr5 = value & CR5_R1MODE,
            _ => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

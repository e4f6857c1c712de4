// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use clockup_config::Latency;
use clockup_core::registers::flash::{ACR_LATENCY_MASK, ACR_RESET};

/// Flash interface: only FLASH_ACR is modelled.
///
/// A new LATENCY value takes effect, and reads back, after the configured
/// latency. Until then the interface keeps using the old setting.
#[derive(Debug, serde::Serialize)]
pub struct Flash {
    acr: u32,
    effective: u32,
    pending: Option<u32>,
    countdown: Option<u64>,
    readback: Latency,
}

impl Flash {
    pub fn new(readback: Latency) -> Self {
        Self {
            acr: ACR_RESET,
            effective: ACR_RESET & ACR_LATENCY_MASK,
            pending: None,
            countdown: None,
            readback,
        }
    }

    /// Wait states currently applied to flash reads.
    pub fn wait_states(&self) -> u8 {
        self.effective as u8
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            0x00 => (self.acr & !ACR_LATENCY_MASK) | self.effective,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        if offset != 0x00 {
            return;
        }
        self.acr = value;
        let latency = value & ACR_LATENCY_MASK;
        if latency == self.effective {
            self.pending = None;
            self.countdown = None;
        } else {
            self.pending = Some(latency);
            self.countdown = self.readback.cycles();
        }
    }
}

impl crate::Peripheral for Flash {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn tick(&mut self, cycles: u64) -> crate::PeripheralTickResult {
        if let (Some(latency), Some(remaining)) = (self.pending, self.countdown) {
            if remaining <= cycles {
                self.effective = latency;
                self.pending = None;
                self.countdown = None;
            } else {
                self.countdown = Some(remaining - cycles);
            }
        }
        crate::PeripheralTickResult::default()
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

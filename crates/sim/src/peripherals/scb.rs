// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use clockup_core::registers::scb::{PRIORITY_BITS, SHPR3_SYSTICK_SHIFT};

/// Mask of the implemented bits in each 8-bit priority field.
const PRIORITY_FIELD_MASK: u32 = {
    let field = (0xFF << (8 - PRIORITY_BITS)) & 0xFF;
    field * 0x0101_0101
};

/// System Control Block at 0xE000_ED00. Only CPUID and SHPR3 (SysTick
/// priority) are modelled; other offsets read as zero and ignore writes.
#[derive(Debug, serde::Serialize)]
pub struct Scb {
    pub cpuid: u32,
    pub shpr3: u32,
}

const CPUID: u32 = 0x00;
const SHPR3: u32 = 0x20;

impl Default for Scb {
    fn default() -> Self {
        Self::new()
    }
}

impl Scb {
    pub fn new() -> Self {
        Self {
            cpuid: 0x410F_C241, // Cortex-M4 r0p1
            shpr3: 0,
        }
    }

    /// SysTick exception priority as stored in SHPR3.
    pub fn systick_priority(&self) -> u8 {
        (self.shpr3 >> SHPR3_SYSTICK_SHIFT) as u8
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            CPUID => self.cpuid,
            SHPR3 => self.shpr3,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        if offset == SHPR3 {
            self.shpr3 = value & PRIORITY_FIELD_MASK;
        }
    }
}

impl crate::Peripheral for Scb {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

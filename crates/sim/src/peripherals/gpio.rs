// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use clockup_core::Port;

/// One STM32G4 GPIO port.
#[derive(Debug, serde::Serialize)]
pub struct GpioPort {
    #[serde(skip)]
    port: Port,
    moder: u32,   // 0x00
    otyper: u32,  // 0x04
    ospeedr: u32, // 0x08
    pupdr: u32,   // 0x0C
    idr: u32,     // 0x10
    odr: u32,     // 0x14
    lckr: u32,    // 0x1C
    afrl: u32,    // 0x20
    afrh: u32,    // 0x24
}

impl GpioPort {
    /// Port at its RM0440 reset values. PA13/PA14/PA15 and PB3/PB4 come up in
    /// their debug alternate functions.
    pub fn new(port: Port) -> Self {
        let (moder, ospeedr, pupdr) = match port {
            Port::A => (0xABFF_FFFF, 0x0C00_0000, 0x6400_0000),
            Port::B => (0xFFFF_FEBF, 0, 0x0000_0100),
            _ => (0xFFFF_FFFF, 0, 0),
        };
        Self {
            port,
            moder,
            otyper: 0,
            ospeedr,
            pupdr,
            idr: 0,
            odr: 0,
            lckr: 0,
            afrl: 0,
            afrh: 0,
        }
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn odr(&self) -> u32 {
        self.odr
    }

    /// Mode field of `pin`: 0 input, 1 output, 2 alternate, 3 analog.
    pub fn mode(&self, pin: u8) -> u32 {
        (self.moder >> (u32::from(pin) * 2)) & 0b11
    }

    fn output_mask(&self) -> u32 {
        (0..16)
            .filter(|&pin| self.mode(pin) == 0b01)
            .fold(0, |mask, pin| mask | (1 << pin))
    }

    fn update_idr(&mut self) {
        let outputs = self.output_mask();
        self.idr = (self.idr & !outputs) | (self.odr & outputs);
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            0x00 => self.moder,
            0x04 => self.otyper,
            0x08 => self.ospeedr,
            0x0C => self.pupdr,
            0x10 => self.idr,
            0x14 => self.odr,
            0x1C => self.lckr,
            0x20 => self.afrl,
            0x24 => self.afrh,
            // BSRR and BRR are write-only
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => self.moder = value,
            0x04 => self.otyper = value & 0xFFFF,
            0x08 => self.ospeedr = value,
            0x0C => self.pupdr = value,
            0x14 => self.odr = value & 0xFFFF,
            0x18 => {
                // Set wins when both halves name the same pin.
                let set = value & 0xFFFF;
                let reset = (value >> 16) & 0xFFFF;
                self.odr = (self.odr & !reset) | set;
            }
            0x1C => self.lckr = value & 0x1_FFFF,
            0x20 => self.afrl = value,
            0x24 => self.afrh = value,
            0x28 => self.odr &= !(value & 0xFFFF),
            _ => {}
        }
        self.update_idr();
    }
}

impl crate::Peripheral for GpioPort {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn output_levels(&self) -> Option<u32> {
        Some(self.odr)
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

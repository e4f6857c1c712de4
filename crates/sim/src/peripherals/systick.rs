// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::SimResult;
use clockup_core::registers::systick::{CSR_COUNTFLAG, CSR_ENABLE, CSR_TICKINT, RVR_MAX};

/// SysTick timer, clocked from HCLK.
///
/// The counter reloads from RVR on the cycle after it reads zero and raises
/// the exception on the 1 -> 0 step, so one period is `RVR + 1` cycles.
/// COUNTFLAG is cleared by a write to CVR only.
#[derive(Debug, Default, serde::Serialize)]
pub struct Systick {
    csr: u32,
    rvr: u32,
    cvr: u32,
    calib: u32,
    fired: u64,
}

impl Systick {
    pub fn new() -> Self {
        Self {
            csr: 0,
            rvr: 0,
            cvr: 0,
            // NOREF set, TENMS unknown
            calib: 0x8000_0000,
            fired: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.csr & CSR_ENABLE != 0
    }

    /// Times the counter has reached zero since reset.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Cycles until the next 1 -> 0 step, or `None` while stopped.
    pub fn cycles_until_fire(&self) -> Option<u64> {
        if !self.enabled() || self.rvr == 0 {
            return None;
        }
        Some(if self.cvr == 0 {
            u64::from(self.rvr) + 1
        } else {
            u64::from(self.cvr)
        })
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            0x00 => self.csr,
            0x04 => self.rvr,
            0x08 => self.cvr,
            0x0C => self.calib,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            0x00 => {
                self.csr = (self.csr & CSR_COUNTFLAG) | (value & 0x7);
            }
            0x04 => {
                self.rvr = value & RVR_MAX;
            }
            0x08 => {
                self.cvr = 0;
                self.csr &= !CSR_COUNTFLAG;
            }
            _ => {}
        }
    }

    /// Advances the counter and returns how many times it reached zero.
    fn advance(&mut self, cycles: u64) -> u64 {
        if !self.enabled() || self.rvr == 0 || cycles == 0 {
            return 0;
        }
        let mut remaining = cycles;
        if self.cvr == 0 {
            self.cvr = self.rvr;
            remaining -= 1;
        }
        let current = u64::from(self.cvr);
        if remaining < current {
            self.cvr -= remaining as u32;
            return 0;
        }

        remaining -= current;
        self.cvr = 0;
        let period = u64::from(self.rvr) + 1;
        let fires = 1 + remaining / period;
        let into_period = remaining % period;
        if into_period > 0 {
            // One cycle reloads, the rest count down.
            self.cvr = self.rvr - (into_period - 1) as u32;
        }
        fires
    }
}

impl crate::Peripheral for Systick {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn tick(&mut self, cycles: u64) -> crate::PeripheralTickResult {
        let fires = self.advance(cycles);
        if fires == 0 {
            return crate::PeripheralTickResult::default();
        }
        self.fired += fires;
        self.csr |= CSR_COUNTFLAG;
        let irqs = if self.csr & CSR_TICKINT != 0 {
            fires.min(u64::from(u32::MAX)) as u32
        } else {
            0
        };
        crate::PeripheralTickResult { irqs }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Peripheral;

    fn armed(reload: u32) -> Systick {
        let mut st = Systick::new();
        st.write(0x04, reload).unwrap();
        st.write(0x08, 0).unwrap();
        st.write(0x00, 0x7).unwrap();
        st
    }

    #[test]
    fn test_period_is_reload_plus_one() {
        let mut st = armed(9);
        assert_eq!(st.cycles_until_fire(), Some(10));
        for _ in 0..9 {
            assert_eq!(st.tick(1).irqs, 0);
        }
        assert_eq!(st.tick(1).irqs, 1);
        assert_eq!(st.cycles_until_fire(), Some(10));
        assert_ne!(st.read(0x00).unwrap() & CSR_COUNTFLAG, 0);
    }

    #[test]
    fn test_bulk_matches_single_steps() {
        let mut bulk = armed(169_999);
        let mut single = armed(169_999);
        let mut single_irqs = 0;
        for _ in 0..512_345 {
            single_irqs += single.tick(1).irqs;
        }
        assert_eq!(bulk.tick(512_345).irqs, single_irqs);
        assert_eq!(single_irqs, 3);
        assert_eq!(bulk.read(0x08).unwrap(), single.read(0x08).unwrap());
    }

    #[test]
    fn test_zero_reload_never_fires() {
        let mut st = armed(0);
        assert_eq!(st.cycles_until_fire(), None);
        assert_eq!(st.tick(1_000).irqs, 0);
    }

    #[test]
    fn test_no_interrupt_without_tickint() {
        let mut st = armed(4);
        st.write(0x00, 0x5).unwrap();
        assert_eq!(st.tick(5).irqs, 0);
        assert_eq!(st.fired(), 1);
    }

    #[test]
    fn test_disabled_counter_holds() {
        let mut st = Systick::new();
        st.write(0x04, 100).unwrap();
        st.tick(1_000);
        assert_eq!(st.read(0x08).unwrap(), 0);
        assert_eq!(st.cycles_until_fire(), None);
    }
}

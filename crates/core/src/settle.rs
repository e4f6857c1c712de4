// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Minimum time spent at the intermediate HCLK before the prescaler is removed.
pub const INTERMEDIATE_SETTLE_NS: u32 = 1_000;

/// Calibrated busy-wait measured in core clock cycles.
pub trait BusyWait {
    fn wait_cycles(&mut self, cycles: u32);
}

impl<W: BusyWait + ?Sized> BusyWait for &mut W {
    fn wait_cycles(&mut self, cycles: u32) {
        (**self).wait_cycles(cycles)
    }
}

/// Cycles needed to cover `duration_ns` at `hclk_hz`, rounded up.
pub const fn settle_cycles(hclk_hz: u32, duration_ns: u32) -> u32 {
    let scaled = hclk_hz as u64 * duration_ns as u64;
    let cycles = scaled.div_ceil(1_000_000_000);
    if cycles > u32::MAX as u64 {
        u32::MAX
    } else {
        cycles as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_microsecond_at_85mhz() {
        assert_eq!(settle_cycles(85_000_000, INTERMEDIATE_SETTLE_NS), 85);
    }

    #[test]
    fn test_rounds_up() {
        // 16 MHz * 1.5 us = 24 cycles exactly; 16 MHz * 1 ns rounds up to 1.
        assert_eq!(settle_cycles(16_000_000, 1_500), 24);
        assert_eq!(settle_cycles(16_000_000, 1), 1);
        assert_eq!(settle_cycles(0, INTERMEDIATE_SETTLE_NS), 0);
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Flash wait states and regulator modes (RM0440 table 29 and §6.1.5).

/// Voltage regulator range 1 sub-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RegulatorMode {
    Normal,
    Boost,
}

impl RegulatorMode {
    /// Highest HCLK the mode sustains.
    pub const fn max_hclk_hz(self) -> u32 {
        match self {
            RegulatorMode::Normal => 150_000_000,
            RegulatorMode::Boost => 170_000_000,
        }
    }

    /// HCLK ceiling for each wait-state count, index = wait states.
    const fn wait_state_ceilings(self) -> &'static [u32] {
        match self {
            RegulatorMode::Normal => &[30_000_000, 60_000_000, 90_000_000, 120_000_000, 150_000_000],
            RegulatorMode::Boost => &[34_000_000, 68_000_000, 102_000_000, 136_000_000, 170_000_000],
        }
    }
}

/// Number of flash wait states (FLASH_ACR.LATENCY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlashLatency(pub u8);

impl FlashLatency {
    pub const MAX: FlashLatency = FlashLatency(15);

    /// Smallest latency that is safe for `hclk_hz`, or `None` when the mode cannot
    /// run that fast at all.
    pub const fn required(hclk_hz: u32, mode: RegulatorMode) -> Option<FlashLatency> {
        let ceilings = mode.wait_state_ceilings();
        let mut ws = 0;
        while ws < ceilings.len() {
            if hclk_hz <= ceilings[ws] {
                return Some(FlashLatency(ws as u8));
            }
            ws += 1;
        }
        None
    }

    /// Highest HCLK this latency supports in `mode`.
    pub const fn max_hclk_hz(self, mode: RegulatorMode) -> u32 {
        let ceilings = mode.wait_state_ceilings();
        let ws = self.0 as usize;
        if ws < ceilings.len() {
            ceilings[ws]
        } else {
            ceilings[ceilings.len() - 1]
        }
    }

    pub const fn bits(self) -> u32 {
        self.0 as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_170mhz_needs_four_wait_states_in_boost() {
        assert_eq!(
            FlashLatency::required(170_000_000, RegulatorMode::Boost),
            Some(FlashLatency(4))
        );
        assert_eq!(FlashLatency::required(170_000_000, RegulatorMode::Normal), None);
    }

    #[test]
    fn test_table_boundaries() {
        assert_eq!(
            FlashLatency::required(16_000_000, RegulatorMode::Normal),
            Some(FlashLatency(0))
        );
        assert_eq!(
            FlashLatency::required(34_000_000, RegulatorMode::Boost),
            Some(FlashLatency(0))
        );
        assert_eq!(
            FlashLatency::required(34_000_001, RegulatorMode::Boost),
            Some(FlashLatency(1))
        );
        assert_eq!(
            FlashLatency::required(85_000_000, RegulatorMode::Normal),
            Some(FlashLatency(2))
        );
    }

    #[test]
    fn test_max_hclk_round_trips_with_required() {
        for mode in [RegulatorMode::Normal, RegulatorMode::Boost] {
            for ws in 0..5u8 {
                let max = FlashLatency(ws).max_hclk_hz(mode);
                assert_eq!(FlashLatency::required(max, mode), Some(FlashLatency(ws)));
            }
        }
        assert_eq!(FlashLatency::MAX.max_hclk_hz(RegulatorMode::Boost), 170_000_000);
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Hardware ordering rules the model enforces.
//!
//! Per-register rules (switching before lock, touching a running PLL) are
//! raised by the RCC block at write time. Clock-tree rules that span blocks
//! (flash latency and regulator mode against HCLK) are evaluated by
//! [`check_clock_tree`] after every bus access.

use clockup_core::{ClockDomainState, FlashLatency, RegulatorMode};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Hsi,
    Hse,
    Pll,
}

impl std::fmt::Display for ClockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ClockSource::Hsi => "HSI16",
            ClockSource::Hse => "HSE",
            ClockSource::Pll => "PLL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardwareViolation {
    #[error("SYSCLK switch to PLL requested before PLLRDY")]
    SwitchBeforeLock,
    #[error("PLLCFGR written while the PLL is enabled")]
    PllReconfiguredWhileOn,
    #[error("PLLON set while the {reference} reference is not ready")]
    PllEnabledWithoutReference { reference: ClockSource },
    #[error("{wait_states} flash wait states at {hclk_hz} Hz, {required} required")]
    FlashLatencyTooLow {
        hclk_hz: u32,
        wait_states: u8,
        required: u8,
    },
    #[error("HCLK {hclk_hz} Hz requires regulator boost mode")]
    BoostRequired { hclk_hz: u32 },
    #[error("HCLK {hclk_hz} Hz exceeds the device maximum")]
    FrequencyAboveLimit { hclk_hz: u32 },
    #[error("switched to a {sysclk_hz} Hz PLL without the AHB /2 intermediate step")]
    MissingIntermediateStep { sysclk_hz: u32 },
    #[error("AHB prescaler removed after {cycles} cycles at the intermediate clock, {required_cycles} required")]
    SettleTooShort { cycles: u64, required_cycles: u64 },
    #[error("{clock} disabled while in use")]
    ClockSourceInUse { clock: ClockSource },
    #[error("GPIO{port} written with its clock disabled")]
    PortClockDisabled { port: char },
}

/// A violation stamped with when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
    pub cycle: u64,
    pub time_ps: u64,
    #[serde(flatten)]
    pub violation: HardwareViolation,
}

/// HCLK above which RM0440 requires the intermediate AHB /2 step when
/// switching to the PLL.
pub const INTERMEDIATE_STEP_THRESHOLD_HZ: u32 = 80_000_000;

/// Evaluates the cross-block rules for the current clock tree.
pub fn check_clock_tree(state: &ClockDomainState) -> Vec<HardwareViolation> {
    let mut found = Vec::new();
    let hclk_hz = state.hclk_hz;
    match FlashLatency::required(hclk_hz, state.regulator) {
        Some(required) => {
            if state.flash_latency() < required {
                found.push(HardwareViolation::FlashLatencyTooLow {
                    hclk_hz,
                    wait_states: state.flash_wait_states,
                    required: required.0,
                });
            }
        }
        None if state.regulator == RegulatorMode::Normal
            && hclk_hz <= RegulatorMode::Boost.max_hclk_hz() =>
        {
            found.push(HardwareViolation::BoostRequired { hclk_hz });
            if let Some(required) = FlashLatency::required(hclk_hz, RegulatorMode::Boost) {
                if state.flash_latency() < required {
                    found.push(HardwareViolation::FlashLatencyTooLow {
                        hclk_hz,
                        wait_states: state.flash_wait_states,
                        required: required.0,
                    });
                }
            }
        }
        None => found.push(HardwareViolation::FrequencyAboveLimit { hclk_hz }),
    }
    found
}

/// Minimum cycles at `hclk_hz` that cover 1 us.
pub fn settle_required_cycles(hclk_hz: u32) -> u64 {
    u64::from(clockup_core::settle::settle_cycles(
        hclk_hz,
        clockup_core::settle::INTERMEDIATE_SETTLE_NS,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockup_core::state::{ActiveSource, PllLock, SysclkSource};

    fn state(hclk_hz: u32, wait_states: u8, regulator: RegulatorMode) -> ClockDomainState {
        ClockDomainState {
            source: ActiveSource::External,
            pll_lock: PllLock::Locked,
            sysclk_source: SysclkSource::Pll,
            flash_wait_states: wait_states,
            regulator,
            hsi_on: false,
            hse_on: true,
            ahb_prescaler: 1,
            sysclk_hz: hclk_hz,
            hclk_hz,
        }
    }

    #[test]
    fn test_correct_final_state_is_clean() {
        assert!(check_clock_tree(&state(170_000_000, 4, RegulatorMode::Boost)).is_empty());
    }

    #[test]
    fn test_low_latency_is_flagged() {
        assert_eq!(
            check_clock_tree(&state(85_000_000, 1, RegulatorMode::Boost)),
            vec![HardwareViolation::FlashLatencyTooLow {
                hclk_hz: 85_000_000,
                wait_states: 1,
                required: 2
            }]
        );
    }

    #[test]
    fn test_normal_mode_at_170mhz_needs_boost() {
        let found = check_clock_tree(&state(170_000_000, 4, RegulatorMode::Normal));
        assert_eq!(
            found,
            vec![HardwareViolation::BoostRequired {
                hclk_hz: 170_000_000
            }]
        );
    }

    #[test]
    fn test_settle_threshold() {
        assert_eq!(settle_required_cycles(85_000_000), 85);
    }

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let record = ViolationRecord {
            cycle: 10,
            time_ps: 625_000,
            violation: HardwareViolation::SwitchBeforeLock,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "switch_before_lock");
        assert_eq!(json["cycle"], 10);
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Main PLL ratio math.
//!
//! `f(PLL_R) = f(ref) * N / (M * R)`, with the RM0440 §7.4.4 limits:
//! M in 1..=16, N in 8..=127, R in {2, 4, 6, 8}, VCO input 2.66..=16 MHz,
//! VCO output 96..=344 MHz and at most 170 MHz on the R tap.
//!
//! Everything here is `const fn` so the firmware can check its ratio set at
//! compile time.

use crate::registers::rcc;

pub const M_MIN: u8 = 1;
pub const M_MAX: u8 = 16;
pub const N_MIN: u8 = 8;
pub const N_MAX: u8 = 127;
pub const R_VALUES: [u8; 4] = [2, 4, 6, 8];

pub const VCO_INPUT_MIN_HZ: u64 = 2_660_000;
pub const VCO_INPUT_MAX_HZ: u64 = 16_000_000;
pub const VCO_OUTPUT_MIN_HZ: u64 = 96_000_000;
pub const VCO_OUTPUT_MAX_HZ: u64 = 344_000_000;
pub const PLLR_OUTPUT_MAX_HZ: u64 = 170_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PllError {
    #[error("PLLM divider {0} outside 1..=16")]
    DividerM(u8),
    #[error("PLLN multiplier {0} outside 8..=127")]
    MultiplierN(u8),
    #[error("PLLR divider {0} is not one of 2, 4, 6, 8")]
    DividerR(u8),
    #[error("VCO input {0} Hz outside 2.66..=16 MHz")]
    VcoInput(u32),
    #[error("VCO output {0} Hz outside 96..=344 MHz")]
    VcoOutput(u64),
    #[error("PLLR output {0} Hz above 170 MHz")]
    Output(u64),
    #[error("{reference_hz} Hz * N / (M * R) is not an integer frequency")]
    Inexact { reference_hz: u32 },
    #[error("no ratio set reaches {target_hz} Hz from a {reference_hz} Hz reference")]
    NoSolution { reference_hz: u32, target_hz: u32 },
}

/// One PLL ratio set together with the reference frequency it was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllConfig {
    pub reference_hz: u32,
    pub m: u8,
    pub n: u8,
    pub r: u8,
}

impl PllConfig {
    pub const fn new(reference_hz: u32, m: u8, n: u8, r: u8) -> Self {
        Self {
            reference_hz,
            m,
            n,
            r,
        }
    }

    /// `reference * N / (M * R)`, truncated. Only meaningful after [`Self::validate`].
    pub const fn output_hz(&self) -> u32 {
        let divisor = self.m as u64 * self.r as u64;
        if divisor == 0 {
            return 0;
        }
        (self.reference_hz as u64 * self.n as u64 / divisor) as u32
    }

    pub const fn vco_input_hz(&self) -> u32 {
        if self.m == 0 {
            return 0;
        }
        self.reference_hz / self.m as u32
    }

    pub const fn vco_output_hz(&self) -> u64 {
        if self.m == 0 {
            return 0;
        }
        self.reference_hz as u64 * self.n as u64 / self.m as u64
    }

    pub const fn validate(&self) -> Result<(), PllError> {
        if self.m < M_MIN || self.m > M_MAX {
            return Err(PllError::DividerM(self.m));
        }
        if self.n < N_MIN || self.n > N_MAX {
            return Err(PllError::MultiplierN(self.n));
        }
        if !matches!(self.r, 2 | 4 | 6 | 8) {
            return Err(PllError::DividerR(self.r));
        }

        // Range checks are done multiplied out so no precision is lost.
        let reference = self.reference_hz as u64;
        let m = self.m as u64;
        if reference < VCO_INPUT_MIN_HZ * m || reference > VCO_INPUT_MAX_HZ * m {
            return Err(PllError::VcoInput(self.vco_input_hz()));
        }
        let vco_scaled = reference * self.n as u64;
        if vco_scaled < VCO_OUTPUT_MIN_HZ * m || vco_scaled > VCO_OUTPUT_MAX_HZ * m {
            return Err(PllError::VcoOutput(self.vco_output_hz()));
        }
        if vco_scaled % (m * self.r as u64) != 0 {
            return Err(PllError::Inexact {
                reference_hz: self.reference_hz,
            });
        }
        let output = vco_scaled / (m * self.r as u64);
        if output > PLLR_OUTPUT_MAX_HZ {
            return Err(PllError::Output(output));
        }
        Ok(())
    }

    /// First valid ratio set that hits `target_hz` exactly, searching M then R
    /// in ascending order.
    pub const fn solve(reference_hz: u32, target_hz: u32) -> Result<Self, PllError> {
        let mut m = M_MIN;
        while m <= M_MAX {
            let mut i = 0;
            while i < R_VALUES.len() {
                if let Some(config) = Self::with_exact_n(reference_hz, target_hz, m, R_VALUES[i]) {
                    return Ok(config);
                }
                i += 1;
            }
            m += 1;
        }
        Err(PllError::NoSolution {
            reference_hz,
            target_hz,
        })
    }

    const fn with_exact_n(reference_hz: u32, target_hz: u32, m: u8, r: u8) -> Option<Self> {
        if reference_hz == 0 {
            return None;
        }
        let scaled = target_hz as u64 * m as u64 * r as u64;
        if scaled % reference_hz as u64 != 0 {
            return None;
        }
        let n = scaled / reference_hz as u64;
        if n < N_MIN as u64 || n > N_MAX as u64 {
            return None;
        }
        let config = Self::new(reference_hz, m, n as u8, r);
        match config.validate() {
            Ok(()) if config.output_hz() == target_hz => Some(config),
            _ => None,
        }
    }

    /// Every valid ratio set that reaches `target_hz` exactly.
    pub fn ratio_sets(reference_hz: u32, target_hz: u32) -> RatioSets {
        RatioSets {
            reference_hz,
            target_hz,
            m: M_MIN,
            r_index: 0,
        }
    }

    /// PLLSRC, PLLM, PLLN and PLLR fields of RCC_PLLCFGR. Output enables are
    /// left clear.
    pub const fn pllcfgr_bits(&self, source_bits: u32) -> u32 {
        let r_bits = (self.r as u32 / 2).saturating_sub(1);
        (source_bits & rcc::PLLCFGR_PLLSRC_MASK)
            | (((self.m as u32).saturating_sub(1) << rcc::PLLCFGR_PLLM_SHIFT) & rcc::PLLCFGR_PLLM_MASK)
            | (((self.n as u32) << rcc::PLLCFGR_PLLN_SHIFT) & rcc::PLLCFGR_PLLN_MASK)
            | ((r_bits << rcc::PLLCFGR_PLLR_SHIFT) & rcc::PLLCFGR_PLLR_MASK)
    }

    /// Inverse of [`Self::pllcfgr_bits`] for a known reference frequency.
    pub const fn from_pllcfgr(raw: u32, reference_hz: u32) -> Self {
        let m = ((raw & rcc::PLLCFGR_PLLM_MASK) >> rcc::PLLCFGR_PLLM_SHIFT) + 1;
        let n = (raw & rcc::PLLCFGR_PLLN_MASK) >> rcc::PLLCFGR_PLLN_SHIFT;
        let r = (((raw & rcc::PLLCFGR_PLLR_MASK) >> rcc::PLLCFGR_PLLR_SHIFT) + 1) * 2;
        Self::new(reference_hz, m as u8, n as u8, r as u8)
    }
}

/// Iterator returned by [`PllConfig::ratio_sets`].
#[derive(Debug, Clone)]
pub struct RatioSets {
    reference_hz: u32,
    target_hz: u32,
    m: u8,
    r_index: usize,
}

impl Iterator for RatioSets {
    type Item = PllConfig;

    fn next(&mut self) -> Option<PllConfig> {
        while self.m <= M_MAX {
            while self.r_index < R_VALUES.len() {
                let r = R_VALUES[self.r_index];
                self.r_index += 1;
                if let Some(config) =
                    PllConfig::with_exact_n(self.reference_hz, self.target_hz, self.m, r)
                {
                    return Some(config);
                }
            }
            self.r_index = 0;
            self.m += 1;
        }
        None
    }
}

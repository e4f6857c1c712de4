// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::registers::rcc;

/// Crystal fitted on the NUCLEO-G431KB.
pub const HSE_HZ: u32 = 24_000_000;
pub const HSI_HZ: u32 = 16_000_000;

/// PLL reference selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorChoice {
    /// HSE crystal.
    External,
    /// HSI16 RC oscillator.
    Internal,
}

impl OscillatorChoice {
    pub const fn oscillator(self) -> Oscillator {
        match self {
            OscillatorChoice::External => Oscillator::Hse,
            OscillatorChoice::Internal => Oscillator::Hsi,
        }
    }

    /// Nominal frequency for the board's oscillators.
    pub const fn reference_hz(self) -> u32 {
        match self {
            OscillatorChoice::External => HSE_HZ,
            OscillatorChoice::Internal => HSI_HZ,
        }
    }

    pub(crate) const fn pllsrc_bits(self) -> u32 {
        match self {
            OscillatorChoice::External => rcc::PLLCFGR_PLLSRC_HSE,
            OscillatorChoice::Internal => rcc::PLLCFGR_PLLSRC_HSI,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oscillator {
    Hsi,
    Hse,
}

impl Oscillator {
    pub(crate) const fn on_bit(self) -> u32 {
        match self {
            Oscillator::Hsi => rcc::CR_HSION,
            Oscillator::Hse => rcc::CR_HSEON,
        }
    }

    pub(crate) const fn ready_bit(self) -> u32 {
        match self {
            Oscillator::Hsi => rcc::CR_HSIRDY,
            Oscillator::Hse => rcc::CR_HSERDY,
        }
    }

    const fn index(self) -> usize {
        match self {
            Oscillator::Hsi => 0,
            Oscillator::Hse => 1,
        }
    }
}

/// Who is holding an oscillator on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscillatorUser {
    /// HSI16 drives SYSCLK out of reset.
    DefaultSysclk,
    PllReference,
}

impl OscillatorUser {
    const fn index(self) -> usize {
        match self {
            OscillatorUser::DefaultSysclk => 0,
            OscillatorUser::PllReference => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("{user:?} released {oscillator:?} without holding a claim")]
    NotClaimed {
        oscillator: Oscillator,
        user: OscillatorUser,
    },
}

/// Reference counts on the shared oscillators, kept per user.
///
/// An oscillator may only be switched off once every claim on it has been
/// released. A user can only release claims it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OscillatorLedger {
    claims: [[u8; 2]; 2],
}

impl OscillatorLedger {
    /// Ledger matching the post-reset clock tree: HSI16 claimed as SYSCLK.
    pub const fn after_reset() -> Self {
        // Rows are oscillators, columns are users.
        Self {
            claims: [[1, 0], [0, 0]],
        }
    }

    pub fn claim(&mut self, oscillator: Oscillator, user: OscillatorUser) {
        let count = &mut self.claims[oscillator.index()][user.index()];
        *count = count.saturating_add(1);
    }

    /// Drops one of `user`'s claims and returns `true` when the oscillator
    /// has no users left. Leaves the ledger untouched if `user` holds none.
    pub fn release(
        &mut self,
        oscillator: Oscillator,
        user: OscillatorUser,
    ) -> Result<bool, LedgerError> {
        let count = &mut self.claims[oscillator.index()][user.index()];
        if *count == 0 {
            return Err(LedgerError::NotClaimed { oscillator, user });
        }
        *count -= 1;
        Ok(!self.in_use(oscillator))
    }

    pub fn claims_by(&self, oscillator: Oscillator, user: OscillatorUser) -> u8 {
        self.claims[oscillator.index()][user.index()]
    }

    pub fn users(&self, oscillator: Oscillator) -> u8 {
        self.claims[oscillator.index()]
            .iter()
            .fold(0u8, |total, count| total.saturating_add(*count))
    }

    pub fn in_use(&self, oscillator: Oscillator) -> bool {
        self.users(oscillator) > 0
    }
}

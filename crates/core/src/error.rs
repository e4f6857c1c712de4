// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::oscillator::LedgerError;
use crate::pll::PllError;
use crate::poll::ReadyCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("timed out waiting for {condition} after {polls} polls")]
    BringUpTimeout {
        condition: ReadyCondition,
        polls: u32,
    },
    #[error("invalid PLL configuration: {0}")]
    Pll(#[from] PllError),
    #[error("no flash latency setting supports {hz} Hz")]
    UnsupportedFrequency { hz: u32 },
    #[error("SysTick reload {reload:#x} does not fit in 24 bits")]
    TickReloadOutOfRange { reload: u32 },
    #[error("clock domain is not in its reset state (PLL already enabled or selected)")]
    NotAtResetState,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    #[error("pin {0} outside 0..=15")]
    InvalidPin(u8),
}

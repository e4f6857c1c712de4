// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Clock bring-up sequencer and tick-driven output scheduler for STM32G4.
//!
//! The crate is `no_std` and hardware-agnostic: all register traffic goes
//! through [`RegisterBus`], all waits through [`PollTimeout`] and [`BusyWait`].
//! The firmware binds these to MMIO, the simulator to its peripheral model.

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod flash;
pub mod gpio;
pub mod oscillator;
pub mod pll;
pub mod poll;
pub mod registers;
pub mod sequencer;
pub mod settle;
pub mod state;
pub mod tick;

pub use error::{ClockError, PinError};
pub use flash::{FlashLatency, RegulatorMode};
pub use gpio::{GpioOutput, Port};
pub use oscillator::{
    LedgerError, Oscillator, OscillatorChoice, OscillatorLedger, OscillatorUser, HSE_HZ, HSI_HZ,
};
pub use pll::{PllConfig, PllError};
pub use poll::{CycleClock, CycleDeadline, PollTimeout, ReadyCondition, RetryBudget};
pub use registers::RegisterBus;
pub use sequencer::{BringUpObserver, BringUpStep, ClockSequencer, Clocks, NoopObserver, TickSource};
pub use settle::BusyWait;
pub use state::ClockDomainState;
pub use tick::{DigitalOutput, Level, TickCounter, TickScheduler, TICK_RATE_HZ, TOGGLE_PERIOD_TICKS};

/// Frequency the board runs at after bring-up.
pub const TARGET_HZ: u32 = 170_000_000;

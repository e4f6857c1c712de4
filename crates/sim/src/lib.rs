// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host-side model of the STM32G431 clock domain.
//!
//! [`bus::SystemBus`] maps the FLASH, PWR, RCC, SysTick, SCB and GPIO
//! register blocks. Every bus access costs one core cycle and advances all
//! peripherals, so ready flags assert after their configured latency and
//! ordering mistakes show up as [`rules::HardwareViolation`]s. [`Machine`]
//! runs the unmodified `clockup-core` sequencer and scheduler on top.

pub mod bus;
pub mod machine;
pub mod observer;
pub mod peripherals;
pub mod rules;

use std::any::Any;

pub use bus::{PinEvent, SharedBus, SystemBus};
pub use machine::{ClocksSummary, LedTransition, Machine, MachineConfig, RunReport};
pub use observer::{FailureRecord, RecordingObserver, StepRecord, TracingObserver};
pub use rules::{ClockSource, HardwareViolation, ViolationRecord};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Unmapped bus access at {0:#010x}")]
    MemoryViolation(u32),
    #[error("Clock bring-up failed: {0}")]
    BringUp(#[from] clockup_core::ClockError),
    #[error("LED pin setup failed: {0}")]
    Pin(#[from] clockup_core::PinError),
    #[error("Invalid scenario: {0}")]
    Scenario(#[from] clockup_config::ScenarioError),
    #[error("{0} requires a completed bring-up")]
    NotReady(&'static str),
}

pub type SimResult<T> = Result<T, SimulationError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeripheralTickResult {
    /// Interrupt requests raised during the tick.
    pub irqs: u32,
}

/// A memory-mapped register block. Offsets are relative to the block base and
/// word aligned.
pub trait Peripheral: std::fmt::Debug + Send {
    fn read(&self, offset: u32) -> SimResult<u32>;
    fn write(&mut self, offset: u32, value: u32) -> SimResult<()>;
    fn tick(&mut self, _cycles: u64) -> PeripheralTickResult {
        PeripheralTickResult::default()
    }
    /// Rule violations detected by the block itself since the last call.
    fn take_violations(&mut self) -> Vec<HardwareViolation> {
        Vec::new()
    }
    /// Output data register, for blocks that drive pins.
    fn output_levels(&self) -> Option<u32> {
        None
    }
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

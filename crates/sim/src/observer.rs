// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! [`BringUpObserver`] implementations for the host.

use crate::bus::SharedBus;
use clockup_core::{BringUpObserver, BringUpStep, ClockError, CycleClock};
use serde::Serialize;

/// Logs each bring-up step through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BringUpObserver for TracingObserver {
    fn on_step_start(&mut self, step: BringUpStep) {
        tracing::debug!("Bring-up step {} started", step);
    }

    fn on_step_complete(&mut self, step: BringUpStep, polls: u32) {
        if polls > 0 {
            tracing::info!("Bring-up step {} done after {} polls", step, polls);
        } else {
            tracing::info!("Bring-up step {} done", step);
        }
    }

    fn on_failure(&mut self, step: BringUpStep, error: &ClockError) {
        tracing::error!("Bring-up step {} failed: {}", step, error);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: BringUpStep,
    pub polls: u32,
    /// Bus cycle at step start and end, when a clock was attached.
    pub started_cycle: Option<u64>,
    pub finished_cycle: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub step: BringUpStep,
    pub message: String,
    #[serde(skip)]
    pub error: ClockError,
}

/// Keeps every completed step, and the failure if there was one.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    clock: Option<SharedBus>,
    started_at: Option<u64>,
    pub steps: Vec<StepRecord>,
    pub failure: Option<FailureRecord>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps records with the cycle count of `bus`.
    pub fn with_clock(bus: SharedBus) -> Self {
        Self {
            clock: Some(bus),
            ..Self::default()
        }
    }

    pub fn completed(&self) -> Vec<BringUpStep> {
        self.steps.iter().map(|record| record.step).collect()
    }

    pub fn polls(&self, step: BringUpStep) -> Option<u32> {
        self.steps
            .iter()
            .find(|record| record.step == step)
            .map(|record| record.polls)
    }

    fn now(&mut self) -> Option<u64> {
        self.clock.as_mut().map(CycleClock::now_cycles)
    }
}

impl BringUpObserver for RecordingObserver {
    fn on_step_start(&mut self, _step: BringUpStep) {
        self.started_at = self.now();
    }

    fn on_step_complete(&mut self, step: BringUpStep, polls: u32) {
        let finished_cycle = self.now();
        self.steps.push(StepRecord {
            step,
            polls,
            started_cycle: self.started_at.take(),
            finished_cycle,
        });
    }

    fn on_failure(&mut self, step: BringUpStep, error: &ClockError) {
        self.failure = Some(FailureRecord {
            step,
            message: error.to_string(),
            error: *error,
        });
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Bounded readiness polling.
//!
//! Every wait on a hardware flag goes through [`poll_until`], which gives up
//! once the injected [`PollTimeout`] reports expiry.

use core::fmt;

use crate::error::ClockError;

/// Hardware flag a bring-up step waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadyCondition {
    FlashLatency,
    HseReady,
    HsiReady,
    PllLock,
    SysclkSwitch,
}

impl ReadyCondition {
    pub const ALL: [ReadyCondition; 5] = [
        ReadyCondition::FlashLatency,
        ReadyCondition::HseReady,
        ReadyCondition::HsiReady,
        ReadyCondition::PllLock,
        ReadyCondition::SysclkSwitch,
    ];
}

impl fmt::Display for ReadyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyCondition::FlashLatency => "flash latency",
            ReadyCondition::HseReady => "HSE ready",
            ReadyCondition::HsiReady => "HSI ready",
            ReadyCondition::PllLock => "PLL lock",
            ReadyCondition::SysclkSwitch => "SYSCLK switch",
        };
        f.write_str(name)
    }
}

/// Decides when a poll loop gives up.
pub trait PollTimeout {
    /// Called once before the first poll of a new condition.
    fn restart(&mut self);
    /// Called after every unsatisfied poll.
    fn expired(&mut self) -> bool;
}

impl<T: PollTimeout + ?Sized> PollTimeout for &mut T {
    fn restart(&mut self) {
        (**self).restart()
    }

    fn expired(&mut self) -> bool {
        (**self).expired()
    }
}

/// Gives up after a fixed number of polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_polls: u32,
    used: u32,
}

impl RetryBudget {
    /// Enough for HSE start-up (a few ms) on a 16 MHz core with margin.
    pub const DEFAULT_POLLS: u32 = 1_000_000;

    pub const fn new(max_polls: u32) -> Self {
        Self { max_polls, used: 0 }
    }

    pub const fn max_polls(&self) -> u32 {
        self.max_polls
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POLLS)
    }
}

impl PollTimeout for RetryBudget {
    fn restart(&mut self) {
        self.used = 0;
    }

    fn expired(&mut self) -> bool {
        self.used = self.used.saturating_add(1);
        self.used >= self.max_polls
    }
}

/// Free-running cycle counter.
pub trait CycleClock {
    fn now_cycles(&mut self) -> u64;
}

/// Gives up once `budget_cycles` have elapsed on a [`CycleClock`].
#[derive(Debug, Clone)]
pub struct CycleDeadline<C> {
    clock: C,
    budget_cycles: u64,
    started_at: u64,
}

impl<C: CycleClock> CycleDeadline<C> {
    pub fn new(clock: C, budget_cycles: u64) -> Self {
        Self {
            clock,
            budget_cycles,
            started_at: 0,
        }
    }

    pub fn into_clock(self) -> C {
        self.clock
    }
}

impl<C: CycleClock> PollTimeout for CycleDeadline<C> {
    fn restart(&mut self) {
        self.started_at = self.clock.now_cycles();
    }

    fn expired(&mut self) -> bool {
        self.clock.now_cycles().saturating_sub(self.started_at) >= self.budget_cycles
    }
}

/// Polls `ready` until it returns `true` or `timeout` expires. Returns the
/// number of polls it took.
pub fn poll_until<T, F>(timeout: &mut T, condition: ReadyCondition, mut ready: F) -> Result<u32, ClockError>
where
    T: PollTimeout + ?Sized,
    F: FnMut() -> bool,
{
    timeout.restart();
    let mut polls = 0u32;
    loop {
        polls = polls.saturating_add(1);
        if ready() {
            return Ok(polls);
        }
        if timeout.expired() {
            return Err(ClockError::BringUpTimeout { condition, polls });
        }
    }
}

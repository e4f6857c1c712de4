// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Tick-driven output toggling.

/// SysTick interrupt rate after bring-up.
pub const TICK_RATE_HZ: u32 = 1_000;
/// Ticks between LED toggles: one toggle per second, 0.5 Hz blink.
pub const TOGGLE_PERIOD_TICKS: u32 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub const fn toggled(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// A push-pull output that can be driven without reading it back.
pub trait DigitalOutput {
    fn set_high(&mut self);
    fn set_low(&mut self);

    fn set_level(&mut self, level: Level) {
        match level {
            Level::High => self.set_high(),
            Level::Low => self.set_low(),
        }
    }
}

impl<P: DigitalOutput + ?Sized> DigitalOutput for &mut P {
    fn set_high(&mut self) {
        (**self).set_high()
    }

    fn set_low(&mut self) {
        (**self).set_low()
    }
}

/// Elapsed ticks, wrapping at the largest multiple of the toggle period that
/// fits in a `u32` so the modulo phase survives the wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickCounter {
    count: u32,
    wrap: u32,
}

impl TickCounter {
    pub const fn new(period: u32) -> Self {
        Self::starting_at(0, period)
    }

    /// Counter preloaded with `count` (reduced into range).
    pub const fn starting_at(count: u32, period: u32) -> Self {
        let period = if period == 0 { 1 } else { period };
        let wrap = (u32::MAX / period) * period;
        Self {
            count: count % wrap,
            wrap,
        }
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    /// First value that is never stored; the counter goes to zero instead.
    pub const fn wrap(&self) -> u32 {
        self.wrap
    }

    /// Counts one tick and returns the new value.
    pub fn advance(&mut self) -> u32 {
        let next = self.count + 1;
        self.count = if next == self.wrap { 0 } else { next };
        self.count
    }
}

/// Flips an output every `period` ticks.
///
/// The scheduler owns the pin and mirrors the level it last drove, so it
/// never reads the output back.
#[derive(Debug)]
pub struct TickScheduler<P> {
    pin: P,
    level: Level,
    counter: TickCounter,
    period: u32,
}

impl<P: DigitalOutput> TickScheduler<P> {
    /// Takes the pin, drives it to `initial`, and toggles once per second.
    pub fn new(pin: P, initial: Level) -> Self {
        Self::with_period(pin, initial, TOGGLE_PERIOD_TICKS)
    }

    pub fn with_period(pin: P, initial: Level, period: u32) -> Self {
        Self::starting_at(pin, initial, 0, period)
    }

    /// Scheduler whose counter already holds `count` ticks. The counter is
    /// built from `period`, so its wrap point is always a whole number of
    /// periods.
    pub fn starting_at(mut pin: P, initial: Level, count: u32, period: u32) -> Self {
        let period = period.max(1);
        pin.set_level(initial);
        Self {
            pin,
            level: initial,
            counter: TickCounter::starting_at(count, period),
            period,
        }
    }

    /// Tick handler body. Returns the new level when the output toggled.
    pub fn on_tick(&mut self) -> Option<Level> {
        if self.counter.advance() % self.period != 0 {
            return None;
        }
        self.level = self.level.toggled();
        self.pin.set_level(self.level);
        Some(self.level)
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn ticks(&self) -> u32 {
        self.counter.count()
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }

    pub fn into_pin(self) -> P {
        self.pin
    }
}

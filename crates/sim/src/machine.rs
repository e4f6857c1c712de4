// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Runs the core bring-up and blink scheduler against the bus model.

use crate::bus::{PinEvent, SharedBus, SystemBus};
use crate::observer::{FailureRecord, RecordingObserver, StepRecord, TracingObserver};
use crate::peripherals::rcc::RccEvent;
use crate::rules::ViolationRecord;
use crate::{SimResult, SimulationError};
use clockup_config::{InitialLevel, Latencies, OscillatorKind, Scenario, ScenarioError};
use clockup_core::{
    BringUpObserver, ClockDomainState, ClockError, ClockSequencer, Clocks, GpioOutput, Level,
    OscillatorChoice, PllConfig, Port, RetryBudget, TickScheduler, TickSource, HSE_HZ, HSI_HZ,
    TARGET_HZ,
};
use anyhow::Context;
use serde::Serialize;
use std::path::Path;

/// SysTick exception number.
const SYSTICK_EXCEPTION: u32 = 15;
const PICOS_PER_MS: u64 = 1_000_000_000;
const PICOS_PER_US: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub name: String,
    pub oscillator: OscillatorChoice,
    /// PLL input frequency.
    pub reference_hz: u32,
    /// Crystal fitted to the board, used when decoding HSE-fed clocks.
    pub hse_hz: u32,
    pub target_hz: u32,
    pub latencies: Latencies,
    pub poll_budget: u32,
    pub led_port: Port,
    pub led_pin: u8,
    pub initial_level: Level,
}

impl MachineConfig {
    /// NUCLEO-G431KB defaults: 24 MHz crystal, LED on PB8.
    pub fn nucleo(oscillator: OscillatorChoice) -> Self {
        Self {
            name: "nucleo-g431kb".to_string(),
            oscillator,
            reference_hz: oscillator.reference_hz(),
            hse_hz: HSE_HZ,
            target_hz: TARGET_HZ,
            latencies: Latencies::default(),
            poll_budget: RetryBudget::DEFAULT_POLLS,
            led_port: Port::B,
            led_pin: 8,
            initial_level: Level::Low,
        }
    }

    pub fn with_latencies(mut self, latencies: Latencies) -> Self {
        self.latencies = latencies;
        self
    }

    pub fn from_scenario(scenario: &Scenario) -> SimResult<Self> {
        scenario.validate()?;
        let oscillator = match scenario.oscillator {
            OscillatorKind::Hse => OscillatorChoice::External,
            OscillatorKind::Hsi => OscillatorChoice::Internal,
        };
        let reference_hz = match (oscillator, scenario.reference) {
            (OscillatorChoice::External, Some(reference)) => reference.hz(),
            (OscillatorChoice::Internal, Some(reference)) if reference.hz() != HSI_HZ => {
                tracing::warn!(
                    "Scenario '{}': HSI16 is fixed at {} Hz, ignoring reference {}",
                    scenario.name,
                    HSI_HZ,
                    reference
                );
                HSI_HZ
            }
            _ => oscillator.reference_hz(),
        };
        let hse_hz = match oscillator {
            OscillatorChoice::External => reference_hz,
            OscillatorChoice::Internal => HSE_HZ,
        };
        let led_port =
            Port::from_letter(scenario.led.port).ok_or(ScenarioError::Port(scenario.led.port))?;

        Ok(Self {
            name: scenario.name.clone(),
            oscillator,
            reference_hz,
            hse_hz,
            target_hz: scenario.target.hz(),
            latencies: scenario.latencies,
            poll_budget: scenario.poll_budget,
            led_port,
            led_pin: scenario.led.pin,
            initial_level: match scenario.initial_level {
                InitialLevel::Low => Level::Low,
                InitialLevel::High => Level::High,
            },
        })
    }
}

/// One LED level change, relative to the moment the tick was armed and
/// rounded to the nearest microsecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedTransition {
    pub at_us: u64,
    pub level: Level,
}

impl LedTransition {
    pub fn at_ms(&self) -> f64 {
        self.at_us as f64 / 1_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClocksSummary {
    pub oscillator: String,
    pub reference_hz: u32,
    pub pll_m: u8,
    pub pll_n: u8,
    pub pll_r: u8,
    pub sysclk_hz: u32,
    pub hclk_hz: u32,
    pub flash_wait_states: u8,
    pub tick_rate_hz: u32,
}

impl From<&Clocks> for ClocksSummary {
    fn from(clocks: &Clocks) -> Self {
        Self {
            oscillator: match clocks.oscillator {
                OscillatorChoice::External => "hse".to_string(),
                OscillatorChoice::Internal => "hsi".to_string(),
            },
            reference_hz: clocks.pll.reference_hz,
            pll_m: clocks.pll.m,
            pll_n: clocks.pll.n,
            pll_r: clocks.pll.r,
            sysclk_hz: clocks.sysclk_hz,
            hclk_hz: clocks.hclk_hz,
            flash_wait_states: clocks.flash_latency.0,
            tick_rate_hz: clocks.tick_rate_hz,
        }
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub scenario: String,
    pub passed: bool,
    pub error: Option<String>,
    pub clocks: Option<ClocksSummary>,
    pub steps: Vec<StepRecord>,
    pub failure: Option<FailureRecord>,
    pub final_state: ClockDomainState,
    pub violations: Vec<ViolationRecord>,
    pub rcc_events: Vec<RccEvent>,
    pub led: Vec<LedTransition>,
    pub duration_ms: u64,
    pub cycles: u64,
    pub unmapped_accesses: usize,
}

type Blinker = TickScheduler<GpioOutput<SharedBus>>;

/// A simulated NUCLEO-G431KB running the bring-up and blink program.
pub struct Machine {
    config: MachineConfig,
    bus: SharedBus,
    clocks: Option<Clocks>,
    tick_source: Option<TickSource>,
    blinker: Option<Blinker>,
    armed_at_ps: Option<u64>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let bus = SharedBus::new(SystemBus::stm32g431(&config.latencies, config.hse_hz));
        Self {
            config,
            bus,
            clocks: None,
            tick_source: None,
            blinker: None,
            armed_at_ps: None,
        }
    }

    pub fn from_scenario(scenario: &Scenario) -> SimResult<Self> {
        Ok(Self::new(MachineConfig::from_scenario(scenario)?))
    }

    /// Loads a scenario file and builds the machine it describes.
    pub fn from_scenario_file<P: AsRef<Path>>(path: P) -> anyhow::Result<(Self, Scenario)> {
        let path = path.as_ref();
        let scenario = Scenario::from_file(path)?;
        let machine = Self::from_scenario(&scenario)
            .with_context(|| format!("Unusable scenario {:?}", path))?;
        Ok((machine, scenario))
    }

    /// Power-on reset: every register back to its reset value.
    pub fn reset(&mut self) {
        tracing::debug!("Machine '{}': reset", self.config.name);
        *self = Self::new(self.config.clone());
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn clocks(&self) -> Option<&Clocks> {
        self.clocks.as_ref()
    }

    pub fn clock_state(&self) -> ClockDomainState {
        self.bus.lock().clock_state()
    }

    pub fn violations(&self) -> Vec<ViolationRecord> {
        self.bus.lock().violations().to_vec()
    }

    pub fn rcc_events(&self) -> Vec<RccEvent> {
        self.bus.lock().rcc_events().to_vec()
    }

    pub fn cycles(&self) -> u64 {
        self.bus.lock().cycles()
    }

    pub fn time_ps(&self) -> u64 {
        self.bus.lock().time_ps()
    }

    /// Runs the clock bring-up. The SysTick is configured but left stopped
    /// until [`Self::start_blinker`].
    pub fn bring_up(&mut self, observer: &mut dyn BringUpObserver) -> SimResult<Clocks> {
        let pll = PllConfig::solve(self.config.reference_hz, self.config.target_hz)
            .map_err(ClockError::from)?;
        tracing::info!(
            "Bringing up {} Hz from {} Hz (M={} N={} R={})",
            pll.output_hz(),
            pll.reference_hz,
            pll.m,
            pll.n,
            pll.r
        );

        let mut sequencer = ClockSequencer::new(
            self.bus.clone(),
            RetryBudget::new(self.config.poll_budget),
            self.bus.clone(),
        );
        let (clocks, tick_source) =
            sequencer.bring_up_observed(pll, self.config.oscillator, observer)?;
        tracing::info!(
            "Clock domain at {} Hz after {} cycles",
            clocks.hclk_hz,
            self.cycles()
        );
        self.clocks = Some(clocks);
        self.tick_source = Some(tick_source);
        Ok(clocks)
    }

    /// Configures the LED pin, installs the scheduler, then arms the tick.
    pub fn start_blinker(&mut self) -> SimResult<()> {
        let tick_source = self
            .tick_source
            .take()
            .ok_or(SimulationError::NotReady("start_blinker"))?;
        let pin = GpioOutput::configure(self.bus.clone(), self.config.led_port, self.config.led_pin)?;
        self.blinker = Some(TickScheduler::new(pin, self.config.initial_level));

        let mut bus = self.bus.clone();
        tick_source.arm(&mut bus);
        let armed_at = self.time_ps();
        tracing::debug!("SysTick armed at {} ps", armed_at);
        self.armed_at_ps = Some(armed_at);
        Ok(())
    }

    /// Lets `duration_ms` of simulated time pass, servicing every SysTick.
    /// Returns the LED transitions that happened meanwhile.
    pub fn run_for_ms(&mut self, duration_ms: u64) -> SimResult<Vec<LedTransition>> {
        if self.blinker.is_none() {
            return Err(SimulationError::NotReady("run_for_ms"));
        }
        let seen = self.led_timeline().len();
        let end_ps = self.time_ps() + duration_ms * PICOS_PER_MS;

        loop {
            let (now_ps, hclk_hz, next_fire) = {
                let bus = self.bus.lock();
                (bus.time_ps(), bus.hclk_hz(), bus.systick_cycles_until_fire())
            };
            if now_ps >= end_ps {
                break;
            }
            let cycles_to_end =
                (u128::from(end_ps - now_ps) * u128::from(hclk_hz) / 1_000_000_000_000) as u64;
            let step = match next_fire {
                Some(cycles) if cycles <= cycles_to_end => cycles,
                _ => cycles_to_end.max(1),
            };
            let exceptions = {
                let mut bus = self.bus.lock();
                bus.advance(step);
                bus.take_exceptions()
            };
            for exception in exceptions {
                self.handle_exception(exception);
            }
        }

        Ok(self.led_timeline().split_off(seen))
    }

    fn handle_exception(&mut self, exception: u32) {
        match (exception, self.blinker.as_mut()) {
            (SYSTICK_EXCEPTION, Some(blinker)) => {
                if let Some(level) = blinker.on_tick() {
                    tracing::debug!("LED -> {:?} after {} ticks", level, blinker.ticks());
                }
            }
            _ => tracing::warn!("Unhandled exception {}", exception),
        }
    }

    /// LED level changes since the tick was armed. The initial drive from
    /// the scheduler lands at 0 µs.
    pub fn led_timeline(&self) -> Vec<LedTransition> {
        let armed_at = self.armed_at_ps.unwrap_or(0);
        let bus = self.bus.lock();
        bus.pin_events()
            .iter()
            .filter(|e| self.is_led(e))
            .map(|e| LedTransition {
                at_us: (e.time_ps.saturating_sub(armed_at) + PICOS_PER_US / 2) / PICOS_PER_US,
                level: e.level,
            })
            .collect()
    }

    fn is_led(&self, event: &PinEvent) -> bool {
        event.port == self.config.led_port.letter() && event.pin == self.config.led_pin
    }

    /// Bring-up, blinker start and `duration_ms` of blinking, as one report.
    /// Failures end up in the report instead of the return value.
    pub fn run(&mut self, duration_ms: u64) -> RunReport {
        let mut observers = (TracingObserver, RecordingObserver::with_clock(self.bus.clone()));
        let outcome = self
            .bring_up(&mut observers)
            .and_then(|_| self.start_blinker())
            .and_then(|_| self.run_for_ms(duration_ms));
        let (_, recording) = observers;

        let error = outcome.err().map(|e| e.to_string());
        if let Some(message) = &error {
            tracing::error!("Scenario '{}' failed: {}", self.config.name, message);
        }
        let (final_state, violations, rcc_events, cycles, unmapped_accesses) = {
            let bus = self.bus.lock();
            (
                bus.clock_state(),
                bus.violations().to_vec(),
                bus.rcc_events().to_vec(),
                bus.cycles(),
                bus.unmapped_accesses().len(),
            )
        };
        RunReport {
            scenario: self.config.name.clone(),
            passed: error.is_none() && violations.is_empty(),
            error,
            clocks: self.clocks.as_ref().map(ClocksSummary::from),
            steps: recording.steps,
            failure: recording.failure,
            final_state,
            violations,
            rcc_events,
            led: self.led_timeline(),
            duration_ms,
            cycles,
            unmapped_accesses,
        }
    }
}

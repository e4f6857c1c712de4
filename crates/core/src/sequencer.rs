// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! One-shot bring-up of the PLL clock domain.
//!
//! The register sequence follows RM0440 §7.2.7 and §6.1.5: raise the flash
//! latency, enter boost mode, start the reference oscillator, lock the PLL,
//! switch to it through an intermediate AHB prescaler of two, then drop the
//! prescaler. Every wait on a ready flag is bounded by the injected
//! [`PollTimeout`].

use core::fmt;

use crate::error::ClockError;
use crate::flash::{FlashLatency, RegulatorMode};
use crate::oscillator::{Oscillator, OscillatorChoice, OscillatorLedger, OscillatorUser};
use crate::pll::PllConfig;
use crate::poll::{poll_until, PollTimeout, ReadyCondition};
use crate::registers::{flash, pwr, rcc, scb, systick, RegisterBus};
use crate::settle::{settle_cycles, BusyWait, INTERMEDIATE_SETTLE_NS};
use crate::tick::TICK_RATE_HZ;

/// Bring-up steps in the order they execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum BringUpStep {
    FlashLatency,
    RegulatorBoost,
    OscillatorEnable,
    PllLock,
    SwitchToPll,
    Settle,
    RemovePrescaler,
    ReleaseOscillator,
    ConfigureTick,
}

impl BringUpStep {
    pub const ALL: [BringUpStep; 9] = [
        BringUpStep::FlashLatency,
        BringUpStep::RegulatorBoost,
        BringUpStep::OscillatorEnable,
        BringUpStep::PllLock,
        BringUpStep::SwitchToPll,
        BringUpStep::Settle,
        BringUpStep::RemovePrescaler,
        BringUpStep::ReleaseOscillator,
        BringUpStep::ConfigureTick,
    ];
}

impl fmt::Display for BringUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BringUpStep::FlashLatency => "flash-latency",
            BringUpStep::RegulatorBoost => "regulator-boost",
            BringUpStep::OscillatorEnable => "oscillator-enable",
            BringUpStep::PllLock => "pll-lock",
            BringUpStep::SwitchToPll => "switch-to-pll",
            BringUpStep::Settle => "settle",
            BringUpStep::RemovePrescaler => "remove-prescaler",
            BringUpStep::ReleaseOscillator => "release-oscillator",
            BringUpStep::ConfigureTick => "configure-tick",
        };
        f.write_str(name)
    }
}

/// Hooks for watching a bring-up. All methods default to no-ops.
///
/// Requests rejected before the first register write (bad ratio set, no
/// flash setting, PLL already running) are returned without callbacks.
pub trait BringUpObserver {
    fn on_step_start(&mut self, _step: BringUpStep) {}
    /// `polls` is the number of ready-flag reads the step needed, zero for
    /// steps that do not wait.
    fn on_step_complete(&mut self, _step: BringUpStep, _polls: u32) {}
    fn on_failure(&mut self, _step: BringUpStep, _error: &ClockError) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BringUpObserver for NoopObserver {}

impl<O: BringUpObserver + ?Sized> BringUpObserver for &mut O {
    fn on_step_start(&mut self, step: BringUpStep) {
        (**self).on_step_start(step)
    }

    fn on_step_complete(&mut self, step: BringUpStep, polls: u32) {
        (**self).on_step_complete(step, polls)
    }

    fn on_failure(&mut self, step: BringUpStep, error: &ClockError) {
        (**self).on_failure(step, error)
    }
}

/// Fans every callback out to both observers, first `A` then `B`.
impl<A: BringUpObserver, B: BringUpObserver> BringUpObserver for (A, B) {
    fn on_step_start(&mut self, step: BringUpStep) {
        self.0.on_step_start(step);
        self.1.on_step_start(step);
    }

    fn on_step_complete(&mut self, step: BringUpStep, polls: u32) {
        self.0.on_step_complete(step, polls);
        self.1.on_step_complete(step, polls);
    }

    fn on_failure(&mut self, step: BringUpStep, error: &ClockError) {
        self.0.on_failure(step, error);
        self.1.on_failure(step, error);
    }
}

/// Frequencies in effect after a successful bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clocks {
    pub sysclk_hz: u32,
    pub hclk_hz: u32,
    pub oscillator: OscillatorChoice,
    pub pll: PllConfig,
    pub flash_latency: FlashLatency,
    pub tick_rate_hz: u32,
}

/// SysTick, configured but not yet counting.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "the tick source does nothing until armed"]
pub struct TickSource {
    reload: u32,
}

impl TickSource {
    pub fn reload(&self) -> u32 {
        self.reload
    }

    /// Starts the counter. Call only after the tick handler's state is in place.
    pub fn arm<B: RegisterBus>(self, bus: &mut B) {
        bus.set_bits(systick::CSR, systick::CSR_ENABLE);
    }
}

/// SysTick reload value for `tick_rate_hz` interrupts per second at `hclk_hz`.
pub const fn tick_reload(hclk_hz: u32, tick_rate_hz: u32) -> Result<u32, ClockError> {
    let ticks = if tick_rate_hz == 0 { 0 } else { hclk_hz / tick_rate_hz };
    if ticks == 0 {
        return Err(ClockError::TickReloadOutOfRange { reload: 0 });
    }
    let reload = ticks - 1;
    if reload > systick::RVR_MAX {
        return Err(ClockError::TickReloadOutOfRange { reload });
    }
    Ok(reload)
}

/// Drives the bring-up over a [`RegisterBus`].
pub struct ClockSequencer<B, T, W> {
    bus: B,
    timeout: T,
    wait: W,
    ledger: OscillatorLedger,
}

impl<B, T, W> ClockSequencer<B, T, W>
where
    B: RegisterBus,
    T: PollTimeout,
    W: BusyWait,
{
    pub fn new(bus: B, timeout: T, wait: W) -> Self {
        Self {
            bus,
            timeout,
            wait,
            ledger: OscillatorLedger::after_reset(),
        }
    }

    /// Raises the core clock to `target_hz` using the board frequency of `oscillator`
    /// as PLL reference.
    pub fn bring_up(
        &mut self,
        target_hz: u32,
        oscillator: OscillatorChoice,
    ) -> Result<(Clocks, TickSource), ClockError> {
        let pll = PllConfig::solve(oscillator.reference_hz(), target_hz)?;
        self.bring_up_with(pll, oscillator)
    }

    /// Same as [`Self::bring_up`] with an explicit ratio set.
    pub fn bring_up_with(
        &mut self,
        pll: PllConfig,
        oscillator: OscillatorChoice,
    ) -> Result<(Clocks, TickSource), ClockError> {
        self.bring_up_observed(pll, oscillator, &mut NoopObserver)
    }

    /// Runs the bring-up with an explicit ratio set, reporting each step to
    /// `observer`.
    ///
    /// Rejected requests (ratio set, flash setting, tick reload, non-reset
    /// state) return before any register is written. Oscillator claims are
    /// reset to the post-reset tree once the start state has been checked,
    /// so a sequencer can be reused after a device reset.
    pub fn bring_up_observed(
        &mut self,
        pll: PllConfig,
        oscillator: OscillatorChoice,
        observer: &mut dyn BringUpObserver,
    ) -> Result<(Clocks, TickSource), ClockError> {
        pll.validate()?;
        let target_hz = pll.output_hz();
        let latency = FlashLatency::required(target_hz, RegulatorMode::Boost)
            .ok_or(ClockError::UnsupportedFrequency { hz: target_hz })?;
        let reload = tick_reload(target_hz, TICK_RATE_HZ)?;
        self.check_reset_state()?;
        self.ledger = OscillatorLedger::after_reset();

        let osc = oscillator.oscillator();
        let ready_condition = match osc {
            Oscillator::Hse => ReadyCondition::HseReady,
            Oscillator::Hsi => ReadyCondition::HsiReady,
        };
        let intermediate_hz = target_hz / 2;

        self.step(observer, BringUpStep::FlashLatency, |s| {
            s.bus.modify_u32(flash::ACR, |acr| {
                (acr & !flash::ACR_LATENCY_MASK) | latency.bits()
            });
            let bus = &mut s.bus;
            poll_until(&mut s.timeout, ReadyCondition::FlashLatency, || {
                bus.read_u32(flash::ACR) & flash::ACR_LATENCY_MASK == latency.bits()
            })
        })?;

        self.step(observer, BringUpStep::RegulatorBoost, |s| {
            s.bus.clear_bits(pwr::CR5, pwr::CR5_R1MODE);
            Ok(0)
        })?;

        self.step(observer, BringUpStep::OscillatorEnable, |s| {
            s.bus.set_bits(rcc::CR, osc.on_bit());
            let bus = &mut s.bus;
            let polls = poll_until(&mut s.timeout, ready_condition, || {
                bus.read_u32(rcc::CR) & osc.ready_bit() != 0
            })?;
            s.ledger.claim(osc, OscillatorUser::PllReference);
            Ok(polls)
        })?;

        self.step(observer, BringUpStep::PllLock, |s| {
            s.bus.write_u32(rcc::PLLCFGR, pll.pllcfgr_bits(oscillator.pllsrc_bits()));
            s.bus.set_bits(rcc::PLLCFGR, rcc::PLLCFGR_PLLREN);
            s.bus.set_bits(rcc::CR, rcc::CR_PLLON);
            let bus = &mut s.bus;
            poll_until(&mut s.timeout, ReadyCondition::PllLock, || {
                bus.read_u32(rcc::CR) & rcc::CR_PLLRDY != 0
            })
        })?;

        self.step(observer, BringUpStep::SwitchToPll, |s| {
            // Source and prescaler change in one write so HCLK never runs at
            // the full PLL rate before the settle period.
            s.bus.modify_u32(rcc::CFGR, |cfgr| {
                (cfgr & !(rcc::CFGR_SW_MASK | rcc::CFGR_HPRE_MASK))
                    | rcc::CFGR_SW_PLL
                    | rcc::CFGR_HPRE_DIV2
            });
            let bus = &mut s.bus;
            let polls = poll_until(&mut s.timeout, ReadyCondition::SysclkSwitch, || {
                bus.read_u32(rcc::CFGR) & rcc::CFGR_SWS_MASK == rcc::CFGR_SWS_PLL
            })?;
            s.ledger.release(Oscillator::Hsi, OscillatorUser::DefaultSysclk)?;
            Ok(polls)
        })?;

        self.step(observer, BringUpStep::Settle, |s| {
            s.wait
                .wait_cycles(settle_cycles(intermediate_hz, INTERMEDIATE_SETTLE_NS));
            Ok(0)
        })?;

        self.step(observer, BringUpStep::RemovePrescaler, |s| {
            s.bus.modify_u32(rcc::CFGR, |cfgr| {
                (cfgr & !rcc::CFGR_HPRE_MASK) | rcc::CFGR_HPRE_DIV1
            });
            Ok(0)
        })?;

        self.step(observer, BringUpStep::ReleaseOscillator, |s| {
            let cr = s.bus.read_u32(rcc::CR);
            for candidate in [Oscillator::Hsi, Oscillator::Hse] {
                if !s.ledger.in_use(candidate) && cr & candidate.on_bit() != 0 {
                    s.bus.clear_bits(rcc::CR, candidate.on_bit());
                }
            }
            Ok(0)
        })?;

        self.step(observer, BringUpStep::ConfigureTick, |s| {
            s.bus.write_u32(systick::RVR, reload);
            let lowest = ((1 << scb::PRIORITY_BITS) - 1) << (8 - scb::PRIORITY_BITS);
            s.bus.modify_u32(scb::SHPR3, |shpr3| {
                (shpr3 & !scb::SHPR3_SYSTICK_MASK) | (lowest << scb::SHPR3_SYSTICK_SHIFT)
            });
            s.bus.write_u32(systick::CVR, 0);
            s.bus
                .write_u32(systick::CSR, systick::CSR_CLKSOURCE | systick::CSR_TICKINT);
            Ok(0)
        })?;

        let clocks = Clocks {
            sysclk_hz: target_hz,
            hclk_hz: target_hz,
            oscillator,
            pll,
            flash_latency: latency,
            tick_rate_hz: TICK_RATE_HZ,
        };
        Ok((clocks, TickSource { reload }))
    }

    /// Oscillator claims as tracked by this sequencer.
    pub fn ledger(&self) -> &OscillatorLedger {
        &self.ledger
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_parts(self) -> (B, T, W) {
        (self.bus, self.timeout, self.wait)
    }

    fn check_reset_state(&mut self) -> Result<(), ClockError> {
        let cr = self.bus.read_u32(rcc::CR);
        let cfgr = self.bus.read_u32(rcc::CFGR);
        if cr & (rcc::CR_PLLON | rcc::CR_PLLRDY) != 0
            || cfgr & rcc::CFGR_SWS_MASK == rcc::CFGR_SWS_PLL
        {
            return Err(ClockError::NotAtResetState);
        }
        Ok(())
    }

    fn step<F>(
        &mut self,
        observer: &mut dyn BringUpObserver,
        step: BringUpStep,
        run: F,
    ) -> Result<(), ClockError>
    where
        F: FnOnce(&mut Self) -> Result<u32, ClockError>,
    {
        observer.on_step_start(step);
        match run(self) {
            Ok(polls) => {
                observer.on_step_complete(step, polls);
                Ok(())
            }
            Err(err) => {
                observer.on_failure(step, &err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::RetryBudget;
    use std::collections::HashMap;

    /// Register file where every ready flag follows its enable immediately.
    #[derive(Debug, Default)]
    struct InstantBus {
        regs: HashMap<u32, u32>,
        writes: Vec<(u32, u32)>,
        stuck: Option<u32>,
    }

    impl InstantBus {
        fn at_reset() -> Self {
            let mut bus = Self::default();
            bus.regs.insert(flash::ACR, flash::ACR_RESET);
            bus.regs.insert(pwr::CR5, pwr::CR5_RESET);
            bus.regs.insert(rcc::CR, rcc::CR_RESET);
            bus.regs.insert(rcc::CFGR, rcc::CFGR_RESET);
            bus.regs.insert(rcc::PLLCFGR, rcc::PLLCFGR_RESET);
            bus
        }

        fn reg(&self, addr: u32) -> u32 {
            self.regs.get(&addr).copied().unwrap_or(0)
        }
    }

    impl RegisterBus for InstantBus {
        fn read_u32(&mut self, addr: u32) -> u32 {
            self.reg(addr)
        }

        fn write_u32(&mut self, addr: u32, mut value: u32) {
            self.writes.push((addr, value));
            match addr {
                rcc::CR => {
                    for (on, rdy) in [
                        (rcc::CR_HSION, rcc::CR_HSIRDY),
                        (rcc::CR_HSEON, rcc::CR_HSERDY),
                        (rcc::CR_PLLON, rcc::CR_PLLRDY),
                    ] {
                        value &= !rdy;
                        if value & on != 0 && self.stuck != Some(rdy) {
                            value |= rdy;
                        }
                    }
                }
                rcc::CFGR => {
                    value = (value & !rcc::CFGR_SWS_MASK)
                        | ((value & rcc::CFGR_SW_MASK) << rcc::CFGR_SWS_SHIFT);
                }
                _ => {}
            }
            self.regs.insert(addr, value);
        }
    }

    #[derive(Debug, Default)]
    struct CountingWait(Vec<u32>);

    impl BusyWait for CountingWait {
        fn wait_cycles(&mut self, cycles: u32) {
            self.0.push(cycles);
        }
    }

    #[derive(Debug, Default)]
    struct StepLog(Vec<(BringUpStep, u32)>, Option<(BringUpStep, ClockError)>);

    impl BringUpObserver for StepLog {
        fn on_step_complete(&mut self, step: BringUpStep, polls: u32) {
            self.0.push((step, polls));
        }

        fn on_failure(&mut self, step: BringUpStep, error: &ClockError) {
            self.1 = Some((step, *error));
        }
    }

    fn sequencer(bus: InstantBus) -> ClockSequencer<InstantBus, RetryBudget, CountingWait> {
        ClockSequencer::new(bus, RetryBudget::new(8), CountingWait::default())
    }

    #[test]
    fn test_hse_bring_up_reaches_170mhz() {
        let mut seq = sequencer(InstantBus::at_reset());
        let (clocks, tick) = seq
            .bring_up(170_000_000, OscillatorChoice::External)
            .unwrap();
        assert_eq!(clocks.sysclk_hz, 170_000_000);
        assert_eq!(clocks.pll, PllConfig::new(24_000_000, 6, 85, 2));
        assert_eq!(clocks.flash_latency, FlashLatency(4));
        assert_eq!(tick.reload(), 169_999);

        let (bus, _, wait) = seq.into_parts();
        assert_eq!(bus.reg(flash::ACR) & flash::ACR_LATENCY_MASK, 4);
        assert_eq!(bus.reg(pwr::CR5) & pwr::CR5_R1MODE, 0);
        assert_eq!(bus.reg(rcc::CR) & rcc::CR_HSION, 0, "HSI released");
        assert_ne!(bus.reg(rcc::CR) & rcc::CR_HSEON, 0);
        assert_eq!(bus.reg(rcc::CFGR) & rcc::CFGR_HPRE_MASK, rcc::CFGR_HPRE_DIV1);
        assert_eq!(bus.reg(systick::RVR), 169_999);
        assert_eq!(bus.reg(systick::CSR) & systick::CSR_ENABLE, 0, "not armed yet");
        assert_eq!(bus.reg(scb::SHPR3) >> 24, 0xF0);
        assert_eq!(wait.0, vec![85]);
    }

    #[test]
    fn test_hsi_bring_up_keeps_hsi_on() {
        let mut seq = sequencer(InstantBus::at_reset());
        let (clocks, _) = seq
            .bring_up(170_000_000, OscillatorChoice::Internal)
            .unwrap();
        assert_eq!(clocks.pll, PllConfig::new(16_000_000, 4, 85, 2));
        assert!(seq.ledger().in_use(Oscillator::Hsi));
        let bus = seq.bus_mut();
        assert_ne!(bus.reg(rcc::CR) & rcc::CR_HSION, 0);
        assert_eq!(
            bus.reg(rcc::PLLCFGR) & rcc::PLLCFGR_PLLSRC_MASK,
            rcc::PLLCFGR_PLLSRC_HSI
        );
    }

    #[test]
    fn test_reused_sequencer_keeps_hsi_after_reset() {
        let mut seq = sequencer(InstantBus::at_reset());
        let _ = seq.bring_up(170_000_000, OscillatorChoice::External).unwrap();
        assert!(!seq.ledger().in_use(Oscillator::Hsi));

        // Device reset between the two runs; the sequencer is kept.
        *seq.bus_mut() = InstantBus::at_reset();
        let (clocks, _) = seq
            .bring_up(170_000_000, OscillatorChoice::Internal)
            .unwrap();
        assert_eq!(clocks.pll, PllConfig::new(16_000_000, 4, 85, 2));
        assert_eq!(
            seq.ledger()
                .claims_by(Oscillator::Hsi, OscillatorUser::PllReference),
            1
        );
        assert!(!seq.ledger().in_use(Oscillator::Hse));

        let bus = seq.bus_mut();
        assert_eq!(
            bus.reg(rcc::PLLCFGR) & rcc::PLLCFGR_PLLSRC_MASK,
            rcc::PLLCFGR_PLLSRC_HSI
        );
        assert_ne!(bus.reg(rcc::CR) & rcc::CR_HSION, 0, "HSI feeds the PLL");
    }

    #[test]
    fn test_steps_run_in_order() {
        let mut seq = sequencer(InstantBus::at_reset());
        let mut log = StepLog::default();
        let _ = seq
            .bring_up_observed(
                PllConfig::new(24_000_000, 6, 85, 2),
                OscillatorChoice::External,
                &mut log,
            )
            .unwrap();
        let steps: Vec<BringUpStep> = log.0.iter().map(|(step, _)| *step).collect();
        assert_eq!(steps, BringUpStep::ALL.to_vec());
        assert!(log.1.is_none());
    }

    #[test]
    fn test_switch_and_prescaler_written_together() {
        let mut seq = sequencer(InstantBus::at_reset());
        let _ = seq.bring_up(170_000_000, OscillatorChoice::External).unwrap();
        let (bus, _, _) = seq.into_parts();
        let cfgr_writes: Vec<u32> = bus
            .writes
            .iter()
            .filter(|(addr, _)| *addr == rcc::CFGR)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(cfgr_writes.len(), 2);
        assert_eq!(cfgr_writes[0] & rcc::CFGR_SW_MASK, rcc::CFGR_SW_PLL);
        assert_eq!(cfgr_writes[0] & rcc::CFGR_HPRE_MASK, rcc::CFGR_HPRE_DIV2);
        assert_eq!(cfgr_writes[1] & rcc::CFGR_HPRE_MASK, rcc::CFGR_HPRE_DIV1);
    }

    #[test]
    fn test_stuck_pll_times_out() {
        let mut bus = InstantBus::at_reset();
        bus.stuck = Some(rcc::CR_PLLRDY);
        let mut seq = sequencer(bus);
        let mut log = StepLog::default();
        let err = seq
            .bring_up_observed(
                PllConfig::new(24_000_000, 6, 85, 2),
                OscillatorChoice::External,
                &mut log,
            )
            .unwrap_err();
        assert_eq!(
            err,
            ClockError::BringUpTimeout {
                condition: ReadyCondition::PllLock,
                polls: 8
            }
        );
        assert_eq!(log.1, Some((BringUpStep::PllLock, err)));
        let bus = seq.bus_mut();
        assert_eq!(bus.reg(rcc::CFGR) & rcc::CFGR_SW_MASK, rcc::CFGR_SW_HSI, "never switched");
    }

    #[test]
    fn test_rejects_running_pll() {
        let mut bus = InstantBus::at_reset();
        bus.regs
            .insert(rcc::CR, rcc::CR_RESET | rcc::CR_PLLON | rcc::CR_PLLRDY);
        let mut seq = sequencer(bus);
        assert_eq!(
            seq.bring_up(170_000_000, OscillatorChoice::External),
            Err(ClockError::NotAtResetState)
        );
    }

    #[test]
    fn test_rejects_unreachable_target() {
        let mut seq = sequencer(InstantBus::at_reset());
        let err = seq
            .bring_up(171_000_000, OscillatorChoice::External)
            .unwrap_err();
        assert!(matches!(err, ClockError::Pll(_)));
        assert!(seq.into_parts().0.writes.is_empty());
    }

    #[test]
    fn test_tick_reload_limits() {
        assert_eq!(tick_reload(170_000_000, 1_000), Ok(169_999));
        assert_eq!(tick_reload(16_000_000, 1_000), Ok(15_999));
        assert_eq!(
            tick_reload(170_000_000, 10),
            Err(ClockError::TickReloadOutOfRange { reload: 16_999_999 })
        );
        assert!(tick_reload(0, 1_000).is_err());
    }
}

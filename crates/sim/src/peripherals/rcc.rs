// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! RCC clock control: oscillators, PLL, SYSCLK mux and AHB prescaler.
//!
//! Ready flags follow their enables after the latencies in [`Latencies`].
//! A [`Latency::Never`] flag stays clear for good. The PLL only counts
//! towards lock while its reference is ready, and the SYSCLK mux only
//! completes a switch once the selected source is ready.

use crate::rules::{
    settle_required_cycles, ClockSource, HardwareViolation, INTERMEDIATE_STEP_THRESHOLD_HZ,
};
use crate::SimResult;
use clockup_config::{Latencies, Latency};
use clockup_core::registers::rcc::{
    CFGR_RESET, CFGR_SWS_MASK, CFGR_SWS_SHIFT, CFGR_SW_HSE, CFGR_SW_MASK, CFGR_SW_PLL, CR_HSEON,
    CR_HSERDY, CR_HSION, CR_HSIRDY, CR_PLLON, CR_PLLRDY, CR_RESET, PLLCFGR_PLLSRC_HSE,
    PLLCFGR_PLLSRC_HSI, PLLCFGR_PLLSRC_MASK, PLLCFGR_RESET,
};
use clockup_core::state::ahb_divider;
use clockup_core::{PllConfig, HSI_HZ};
use serde::Serialize;

const CR: u32 = 0x00;
const CFGR: u32 = 0x08;
const PLLCFGR: u32 = 0x0C;
const AHB1ENR: u32 = 0x48;
const AHB2ENR: u32 = 0x4C;
const APB1ENR1: u32 = 0x58;
const APB2ENR: u32 = 0x60;

/// What changed in the clock tree, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RccEventKind {
    OscillatorReady { oscillator: ClockSource },
    PllLocked,
    SysclkSwitched { to: ClockSource },
    PrescalerChanged { divider: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RccEvent {
    pub cycle: u64,
    #[serde(flatten)]
    pub kind: RccEventKind,
}

#[derive(Debug, Serialize)]
pub struct Rcc {
    cr: u32,
    cfgr: u32,
    pllcfgr: u32,
    ahb1enr: u32,
    ahb2enr: u32,
    apb1enr1: u32,
    apb2enr: u32,
    latencies: Latencies,
    hse_hz: u32,
    now: u64,
    hsi_countdown: Option<u64>,
    hse_countdown: Option<u64>,
    pll_countdown: Option<u64>,
    switch_countdown: Option<u64>,
    pll_active_since: Option<u64>,
    events: Vec<RccEvent>,
    #[serde(skip)]
    violations: Vec<HardwareViolation>,
}

impl Rcc {
    /// RCC at reset. `hse_hz` is the crystal fitted to the board.
    pub fn new(latencies: Latencies, hse_hz: u32) -> Self {
        // HSI16 runs from reset unless the scenario says it never starts.
        let cr = match latencies.hsi_ready {
            Latency::Never => CR_HSION,
            Latency::Cycles(_) => CR_RESET,
        };
        Self {
            cr,
            cfgr: CFGR_RESET,
            pllcfgr: PLLCFGR_RESET,
            ahb1enr: 0x0000_0100,
            ahb2enr: 0,
            apb1enr1: 0x0000_0400,
            apb2enr: 0,
            latencies,
            hse_hz,
            now: 0,
            hsi_countdown: None,
            hse_countdown: None,
            pll_countdown: None,
            switch_countdown: None,
            pll_active_since: None,
            events: Vec::new(),
            violations: Vec::new(),
        }
    }

    pub fn events(&self) -> &[RccEvent] {
        &self.events
    }

    pub fn ahb2enr(&self) -> u32 {
        self.ahb2enr
    }

    /// SYSCLK source reported by CFGR.SWS.
    pub fn active_source(&self) -> ClockSource {
        match (self.cfgr & CFGR_SWS_MASK) >> CFGR_SWS_SHIFT {
            CFGR_SW_HSE => ClockSource::Hse,
            CFGR_SW_PLL => ClockSource::Pll,
            _ => ClockSource::Hsi,
        }
    }

    /// SYSCLK source requested in CFGR.SW.
    pub fn requested_source(&self) -> ClockSource {
        match self.cfgr & CFGR_SW_MASK {
            CFGR_SW_HSE => ClockSource::Hse,
            CFGR_SW_PLL => ClockSource::Pll,
            _ => ClockSource::Hsi,
        }
    }

    /// PLL input selected by PLLSRC, `None` when no clock is selected.
    pub fn pll_reference(&self) -> Option<ClockSource> {
        match self.pllcfgr & PLLCFGR_PLLSRC_MASK {
            PLLCFGR_PLLSRC_HSE => Some(ClockSource::Hse),
            PLLCFGR_PLLSRC_HSI => Some(ClockSource::Hsi),
            _ => None,
        }
    }

    /// PLLCLK (R output) for the programmed ratios.
    pub fn pll_output_hz(&self) -> u32 {
        let reference_hz = match self.pll_reference() {
            Some(ClockSource::Hse) => self.hse_hz,
            Some(_) => HSI_HZ,
            None => 0,
        };
        PllConfig::from_pllcfgr(self.pllcfgr, reference_hz).output_hz()
    }

    pub fn is_ready(&self, source: ClockSource) -> bool {
        let bit = match source {
            ClockSource::Hsi => CR_HSIRDY,
            ClockSource::Hse => CR_HSERDY,
            ClockSource::Pll => CR_PLLRDY,
        };
        self.cr & bit != 0
    }

    fn in_use(&self, source: ClockSource) -> bool {
        self.active_source() == source
            || self.requested_source() == source
            || (self.cr & CR_PLLON != 0 && self.pll_reference() == Some(source))
    }

    fn violation(&mut self, violation: HardwareViolation) {
        tracing::debug!(cycle = self.now, "RCC: {}", violation);
        self.violations.push(violation);
    }

    fn write_cr(&mut self, value: u32) {
        for (source, on, rdy) in [
            (ClockSource::Hsi, CR_HSION, CR_HSIRDY),
            (ClockSource::Hse, CR_HSEON, CR_HSERDY),
        ] {
            let was_on = self.cr & on != 0;
            let want_on = value & on != 0;
            if want_on && !was_on {
                self.cr |= on;
                let latency = match source {
                    ClockSource::Hsi => self.latencies.hsi_ready,
                    _ => self.latencies.hse_ready,
                };
                let countdown = latency.cycles();
                match source {
                    ClockSource::Hsi => self.hsi_countdown = countdown,
                    _ => self.hse_countdown = countdown,
                }
            } else if was_on && !want_on {
                if self.in_use(source) {
                    self.violation(HardwareViolation::ClockSourceInUse { clock: source });
                    continue;
                }
                self.cr &= !(on | rdy);
                match source {
                    ClockSource::Hsi => self.hsi_countdown = None,
                    _ => self.hse_countdown = None,
                }
            }
        }

        let pll_was_on = self.cr & CR_PLLON != 0;
        let pll_want_on = value & CR_PLLON != 0;
        if pll_want_on && !pll_was_on {
            self.cr |= CR_PLLON;
            if let Some(reference) = self.pll_reference() {
                if !self.is_ready(reference) {
                    self.violation(HardwareViolation::PllEnabledWithoutReference { reference });
                }
            }
            self.pll_countdown = self.latencies.pll_lock.cycles();
        } else if pll_was_on && !pll_want_on {
            if self.in_use(ClockSource::Pll) {
                self.violation(HardwareViolation::ClockSourceInUse {
                    clock: ClockSource::Pll,
                });
            } else {
                self.cr &= !(CR_PLLON | CR_PLLRDY);
                self.pll_countdown = None;
            }
        }
    }

    fn write_cfgr(&mut self, value: u32) {
        let old = self.cfgr;
        self.cfgr = (value & !CFGR_SWS_MASK) | (old & CFGR_SWS_MASK);

        let old_divider = ahb_divider(old);
        let new_divider = ahb_divider(value);
        let pll_hz = self.pll_output_hz();

        if value & CFGR_SW_MASK != old & CFGR_SW_MASK {
            if self.requested_source() == ClockSource::Pll {
                if !self.is_ready(ClockSource::Pll) {
                    self.violation(HardwareViolation::SwitchBeforeLock);
                }
                if new_divider == 1 && pll_hz > INTERMEDIATE_STEP_THRESHOLD_HZ {
                    self.violation(HardwareViolation::MissingIntermediateStep {
                        sysclk_hz: pll_hz,
                    });
                }
            }
            self.switch_countdown = self.latencies.sysclk_switch.cycles();
        }

        if new_divider != old_divider {
            self.events.push(RccEvent {
                cycle: self.now,
                kind: RccEventKind::PrescalerChanged {
                    divider: new_divider,
                },
            });
            let at_full_rate = new_divider == 1 && old_divider > 1;
            if at_full_rate
                && self.requested_source() == ClockSource::Pll
                && pll_hz > INTERMEDIATE_STEP_THRESHOLD_HZ
            {
                match self.pll_active_since {
                    Some(since) if self.active_source() == ClockSource::Pll => {
                        let cycles = self.now - since;
                        let required_cycles =
                            settle_required_cycles(pll_hz / u32::from(old_divider));
                        if cycles < required_cycles {
                            self.violation(HardwareViolation::SettleTooShort {
                                cycles,
                                required_cycles,
                            });
                        }
                    }
                    _ => self.violation(HardwareViolation::MissingIntermediateStep {
                        sysclk_hz: pll_hz,
                    }),
                }
            }
        }
    }

    fn write_pllcfgr(&mut self, value: u32) {
        if self.cr & CR_PLLON != 0 {
            self.violation(HardwareViolation::PllReconfiguredWhileOn);
            return;
        }
        self.pllcfgr = value;
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            CR => self.cr,
            CFGR => self.cfgr,
            PLLCFGR => self.pllcfgr,
            AHB1ENR => self.ahb1enr,
            AHB2ENR => self.ahb2enr,
            APB1ENR1 => self.apb1enr1,
            APB2ENR => self.apb2enr,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            CR => self.write_cr(value),
            CFGR => self.write_cfgr(value),
            PLLCFGR => self.write_pllcfgr(value),
            AHB1ENR => self.ahb1enr = value,
            AHB2ENR => self.ahb2enr = value,
            APB1ENR1 => self.apb1enr1 = value,
            APB2ENR => self.apb2enr = value,
            _ => {}
        }
    }

    fn ready_event(&mut self, kind: RccEventKind) {
        self.events.push(RccEvent {
            cycle: self.now,
            kind,
        });
    }
}

/// Counts `countdown` down by `cycles`; true when it expired.
fn expire(countdown: &mut Option<u64>, cycles: u64) -> bool {
    match *countdown {
        Some(remaining) if remaining <= cycles => {
            *countdown = None;
            true
        }
        Some(remaining) => {
            *countdown = Some(remaining - cycles);
            false
        }
        None => false,
    }
}

impl crate::Peripheral for Rcc {
    fn read(&self, offset: u32) -> SimResult<u32> {
        Ok(self.read_reg(offset))
    }

    fn write(&mut self, offset: u32, value: u32) -> SimResult<()> {
        self.write_reg(offset, value);
        Ok(())
    }

    fn tick(&mut self, cycles: u64) -> crate::PeripheralTickResult {
        self.now += cycles;

        if expire(&mut self.hsi_countdown, cycles) {
            self.cr |= CR_HSIRDY;
            self.ready_event(RccEventKind::OscillatorReady {
                oscillator: ClockSource::Hsi,
            });
        }
        if expire(&mut self.hse_countdown, cycles) {
            self.cr |= CR_HSERDY;
            self.ready_event(RccEventKind::OscillatorReady {
                oscillator: ClockSource::Hse,
            });
        }

        let reference_ready = self.pll_reference().is_some_and(|r| self.is_ready(r));
        if self.cr & CR_PLLON != 0
            && reference_ready
            && expire(&mut self.pll_countdown, cycles)
        {
            self.cr |= CR_PLLRDY;
            self.ready_event(RccEventKind::PllLocked);
        }

        let target = self.requested_source();
        if self.is_ready(target) && expire(&mut self.switch_countdown, cycles) {
            let sw = self.cfgr & CFGR_SW_MASK;
            self.cfgr = (self.cfgr & !CFGR_SWS_MASK) | (sw << CFGR_SWS_SHIFT);
            self.pll_active_since = (target == ClockSource::Pll).then_some(self.now);
            self.ready_event(RccEventKind::SysclkSwitched { to: target });
        }

        crate::PeripheralTickResult::default()
    }

    fn take_violations(&mut self) -> Vec<HardwareViolation> {
        std::mem::take(&mut self.violations)
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

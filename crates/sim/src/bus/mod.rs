// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::peripherals::flash::Flash;
use crate::peripherals::gpio::GpioPort;
use crate::peripherals::pwr::Pwr;
use crate::peripherals::rcc::{Rcc, RccEvent};
use crate::peripherals::scb::Scb;
use crate::peripherals::systick::Systick;
use crate::rules::{check_clock_tree, HardwareViolation, ViolationRecord};
use crate::{Peripheral, SimResult, SimulationError};
use clockup_config::Latencies;
use clockup_core::registers::{flash, pwr, rcc, systick, RegisterBus};
use clockup_core::{BusyWait, ClockDomainState, CycleClock, Level, Port, HSI_HZ};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const PICOS_PER_SECOND: u128 = 1_000_000_000_000;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u32,
    pub size: u32,
    pub irq: Option<u32>,
    /// Set for GPIO ports, whose writes are gated by RCC_AHB2ENR.
    pub port: Option<Port>,
    pub dev: Box<dyn Peripheral>,
}

impl PeripheralEntry {
    fn new(name: &str, base: u32, size: u32, dev: Box<dyn Peripheral>) -> Self {
        Self {
            name: name.to_string(),
            base,
            size,
            irq: None,
            port: None,
            dev,
        }
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

/// An output data register bit that changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PinEvent {
    pub cycle: u64,
    pub time_ps: u64,
    pub port: char,
    pub pin: u8,
    pub level: Level,
}

/// The STM32G431 clock domain as seen from the core.
///
/// Each [`Self::read_u32`] or [`Self::write_u32`] takes one HCLK cycle and
/// ticks every peripheral. Simulated time follows HCLK as the RCC model
/// changes it.
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
    hse_hz: u32,
    cycles: u64,
    time_ps: u64,
    time_remainder: u128,
    hclk_hz: u32,
    active_tree_violations: Vec<HardwareViolation>,
    violations: Vec<ViolationRecord>,
    pin_events: Vec<PinEvent>,
    pending_exceptions: Vec<u32>,
    unmapped: Vec<u32>,
}

impl SystemBus {
    /// FLASH, PWR, RCC, SysTick, SCB and GPIOA..G at their RM0440 addresses.
    pub fn stm32g431(latencies: &Latencies, hse_hz: u32) -> Self {
        let mut peripherals = vec![
            PeripheralEntry::new(
                "flash",
                flash::BASE,
                0x400,
                Box::new(Flash::new(latencies.flash_latency)),
            ),
            PeripheralEntry::new("pwr", pwr::BASE, 0x400, Box::new(Pwr::new())),
            PeripheralEntry::new("rcc", rcc::BASE, 0x400, Box::new(Rcc::new(*latencies, hse_hz))),
            PeripheralEntry {
                irq: Some(15),
                ..PeripheralEntry::new("systick", systick::BASE, 0x10, Box::new(Systick::new()))
            },
            PeripheralEntry::new("scb", 0xE000_ED00, 0x40, Box::new(Scb::new())),
        ];
        for port in Port::ALL {
            let name = format!("gpio{}", port.letter().to_ascii_lowercase());
            peripherals.push(PeripheralEntry {
                port: Some(port),
                ..PeripheralEntry::new(&name, port.base(), 0x400, Box::new(GpioPort::new(port)))
            });
        }

        let mut bus = Self {
            peripherals,
            hse_hz,
            cycles: 0,
            time_ps: 0,
            time_remainder: 0,
            hclk_hz: HSI_HZ,
            active_tree_violations: Vec::new(),
            violations: Vec::new(),
            pin_events: Vec::new(),
            pending_exceptions: Vec::new(),
            unmapped: Vec::new(),
        };
        bus.refresh_clock_tree();
        bus
    }

    fn find(&self, addr: u32) -> Option<usize> {
        self.peripherals.iter().position(|p| p.contains(addr))
    }

    pub fn read_u32(&mut self, addr: u32) -> SimResult<u32> {
        let Some(index) = self.find(addr) else {
            return self.unmapped_access(addr);
        };
        let entry = &self.peripherals[index];
        let value = entry.dev.read(addr - entry.base)?;
        self.advance(1);
        Ok(value)
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> SimResult<()> {
        let Some(index) = self.find(addr) else {
            return self.unmapped_access(addr).map(|_| ());
        };

        if let Some(port) = self.peripherals[index].port {
            if self.rcc_ahb2enr() & port.clock_enable_bit() == 0 {
                self.record(HardwareViolation::PortClockDisabled {
                    port: port.letter(),
                });
                self.advance(1);
                return Ok(());
            }
        }

        let entry = &mut self.peripherals[index];
        let before = entry.dev.output_levels();
        entry.dev.write(addr - entry.base, value)?;
        let after = entry.dev.output_levels();
        let found = entry.dev.take_violations();
        let port = entry.port;

        if let (Some(port), Some(before), Some(after)) = (port, before, after) {
            self.record_pin_changes(port, before, after);
        }
        for violation in found {
            self.record(violation);
        }
        self.refresh_clock_tree();
        self.advance(1);
        Ok(())
    }

    /// Side-effect free read: no time passes and nothing is recorded.
    pub fn peek_u32(&self, addr: u32) -> SimResult<u32> {
        let index = self
            .find(addr)
            .ok_or(SimulationError::MemoryViolation(addr))?;
        let entry = &self.peripherals[index];
        entry.dev.read(addr - entry.base)
    }

    /// Lets `cycles` HCLK cycles pass.
    pub fn advance(&mut self, cycles: u64) {
        if cycles == 0 {
            return;
        }
        let mut found = Vec::new();
        for p in &mut self.peripherals {
            let res = p.dev.tick(cycles);
            if res.irqs > 0 {
                if let Some(irq) = p.irq {
                    self.pending_exceptions
                        .extend(std::iter::repeat(irq).take(res.irqs as usize));
                }
            }
            found.extend(p.dev.take_violations());
        }

        self.cycles += cycles;
        let elapsed = u128::from(cycles) * PICOS_PER_SECOND + self.time_remainder;
        let hclk = u128::from(self.hclk_hz.max(1));
        self.time_ps += (elapsed / hclk) as u64;
        self.time_remainder = elapsed % hclk;

        for violation in found {
            self.record(violation);
        }
        self.refresh_clock_tree();
    }

    fn unmapped_access(&mut self, addr: u32) -> SimResult<u32> {
        tracing::warn!("Unmapped bus access at {:#010x}", addr);
        self.unmapped.push(addr);
        self.advance(1);
        Err(SimulationError::MemoryViolation(addr))
    }

    fn record(&mut self, violation: HardwareViolation) {
        tracing::warn!(cycle = self.cycles, "Hardware rule violated: {}", violation);
        self.violations.push(ViolationRecord {
            cycle: self.cycles,
            time_ps: self.time_ps,
            violation,
        });
    }

    fn record_pin_changes(&mut self, port: Port, before: u32, after: u32) {
        let changed = before ^ after;
        for pin in 0..16u8 {
            if changed & (1 << pin) == 0 {
                continue;
            }
            let level = Level::from(after & (1 << pin) != 0);
            tracing::debug!(
                cycle = self.cycles,
                "P{}{} -> {:?}",
                port.letter(),
                pin,
                level
            );
            self.pin_events.push(PinEvent {
                cycle: self.cycles,
                time_ps: self.time_ps,
                port: port.letter(),
                pin,
                level,
            });
        }
    }

    /// Re-derives HCLK and records clock-tree violations as they appear.
    fn refresh_clock_tree(&mut self) {
        let state = self.clock_state();
        self.hclk_hz = state.hclk_hz;
        let found = check_clock_tree(&state);
        for violation in &found {
            if !self.active_tree_violations.contains(violation) {
                self.record(violation.clone());
            }
        }
        self.active_tree_violations = found;
    }

    fn rcc_ahb2enr(&self) -> u32 {
        self.peek_u32(rcc::AHB2ENR).unwrap_or(0)
    }

    pub fn clock_state(&self) -> ClockDomainState {
        ClockDomainState::capture(&mut Peek(self), self.hse_hz)
    }

    pub fn hclk_hz(&self) -> u32 {
        self.hclk_hz
    }

    pub fn hse_hz(&self) -> u32 {
        self.hse_hz
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn time_ps(&self) -> u64 {
        self.time_ps
    }

    pub fn violations(&self) -> &[ViolationRecord] {
        &self.violations
    }

    pub fn pin_events(&self) -> &[PinEvent] {
        &self.pin_events
    }

    pub fn unmapped_accesses(&self) -> &[u32] {
        &self.unmapped
    }

    /// Exception numbers raised since the last call, in order.
    pub fn take_exceptions(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.pending_exceptions)
    }

    pub fn peripheral<T: 'static>(&self, name: &str) -> Option<&T> {
        self.peripherals
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.dev.as_any())
            .and_then(|any| any.downcast_ref::<T>())
    }

    pub fn rcc(&self) -> Option<&Rcc> {
        self.peripheral::<Rcc>("rcc")
    }

    pub fn rcc_events(&self) -> &[RccEvent] {
        self.rcc().map(Rcc::events).unwrap_or(&[])
    }

    pub fn systick(&self) -> Option<&Systick> {
        self.peripheral::<Systick>("systick")
    }

    pub fn systick_cycles_until_fire(&self) -> Option<u64> {
        self.systick().and_then(Systick::cycles_until_fire)
    }

    /// Register dump of every block, keyed by block name.
    pub fn snapshot(&self) -> serde_json::Value {
        let blocks = self
            .peripherals
            .iter()
            .map(|p| (p.name.clone(), p.dev.snapshot()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(blocks)
    }
}

/// Read-only [`RegisterBus`] view used to decode the clock tree without
/// spending cycles.
struct Peek<'a>(&'a SystemBus);

impl RegisterBus for Peek<'_> {
    fn read_u32(&mut self, addr: u32) -> u32 {
        self.0.peek_u32(addr).unwrap_or(0)
    }

    fn write_u32(&mut self, addr: u32, _value: u32) {
        tracing::warn!("Ignoring write to {:#010x} through a peek view", addr);
    }
}

/// Cloneable handle to a [`SystemBus`].
///
/// The sequencer, its busy-wait and the LED pin each hold one, as firmware
/// would all address the same registers.
#[derive(Clone)]
pub struct SharedBus(Arc<Mutex<SystemBus>>);

impl SharedBus {
    pub fn new(bus: SystemBus) -> Self {
        Self(Arc::new(Mutex::new(bus)))
    }

    pub fn lock(&self) -> MutexGuard<'_, SystemBus> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bus = self.lock();
        f.debug_struct("SharedBus")
            .field("cycles", &bus.cycles())
            .field("hclk_hz", &bus.hclk_hz())
            .finish()
    }
}

impl RegisterBus for SharedBus {
    fn read_u32(&mut self, addr: u32) -> u32 {
        self.lock().read_u32(addr).unwrap_or(0)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        // Unmapped writes are logged and counted by the bus.
        let _ = self.lock().write_u32(addr, value);
    }
}

impl BusyWait for SharedBus {
    fn wait_cycles(&mut self, cycles: u32) {
        self.lock().advance(u64::from(cycles));
    }
}

impl CycleClock for SharedBus {
    fn now_cycles(&mut self) -> u64 {
        self.lock().cycles()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clockup_core::registers::gpio;

    fn bus() -> SystemBus {
        SystemBus::stm32g431(&Latencies::default(), 24_000_000)
    }

    #[test]
    fn test_reset_clock_state() {
        let bus = bus();
        let state = bus.clock_state();
        assert_eq!(state.hclk_hz, 16_000_000);
        assert!(bus.violations().is_empty());
    }

    #[test]
    fn test_every_access_costs_one_cycle() {
        let mut bus = bus();
        bus.read_u32(rcc::CR).unwrap();
        bus.write_u32(rcc::AHB2ENR, 0).unwrap();
        assert_eq!(bus.cycles(), 2);
        // 16 MHz: 62.5 ns per cycle.
        assert_eq!(bus.time_ps(), 125_000);
        bus.peek_u32(rcc::CR).unwrap();
        assert_eq!(bus.cycles(), 2);
    }

    #[test]
    fn test_fractional_cycle_time_accumulates() {
        let mut bus = SystemBus::stm32g431(&Latencies::default(), 24_000_000);
        bus.hclk_hz = 3;
        bus.time_ps = 0;
        bus.time_remainder = 0;
        // Advancing refreshes HCLK back to 16 MHz after the first interval.
        bus.advance(1);
        assert_eq!(bus.time_ps(), 333_333_333_333);
        assert_eq!(bus.time_remainder, 1);
    }

    #[test]
    fn test_unmapped_access_is_reported() {
        let mut bus = bus();
        assert!(matches!(
            bus.read_u32(0x2000_0000),
            Err(SimulationError::MemoryViolation(0x2000_0000))
        ));
        assert_eq!(bus.unmapped_accesses(), &[0x2000_0000]);
        assert_eq!(bus.cycles(), 1);
    }

    #[test]
    fn test_gpio_write_without_clock_is_dropped() {
        let mut bus = bus();
        bus.write_u32(Port::B.base() + gpio::BSRR, 1 << 8).unwrap();
        assert!(bus.pin_events().is_empty());
        assert_eq!(
            bus.violations()[0].violation,
            HardwareViolation::PortClockDisabled { port: 'B' }
        );
    }

    #[test]
    fn test_pin_events_follow_odr() {
        let mut bus = bus();
        bus.write_u32(rcc::AHB2ENR, Port::B.clock_enable_bit()).unwrap();
        bus.write_u32(Port::B.base() + gpio::BSRR, 1 << 8).unwrap();
        bus.write_u32(Port::B.base() + gpio::BSRR, 1 << 8).unwrap();
        bus.write_u32(Port::B.base() + gpio::BSRR, 1 << 24).unwrap();
        let events: Vec<_> = bus.pin_events().iter().map(|e| (e.pin, e.level)).collect();
        assert_eq!(events, vec![(8, Level::High), (8, Level::Low)]);
        assert_eq!(bus.pin_events()[0].port, 'B');
    }

    #[test]
    fn test_shared_bus_counts_busy_wait() {
        let mut shared = SharedBus::new(bus());
        shared.wait_cycles(85);
        assert_eq!(shared.now_cycles(), 85);
        assert_eq!(RegisterBus::read_u32(&mut shared, rcc::CR) & rcc::CR_HSIRDY, rcc::CR_HSIRDY);
    }
}

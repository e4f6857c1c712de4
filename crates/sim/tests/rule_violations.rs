// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Hand-written register sequences that break the RM0440 ordering rules.

use clockup_config::{Latencies, Latency};
use clockup_core::registers::{flash, pwr, rcc};
use clockup_core::PllConfig;
use clockup_sim::{ClockSource, HardwareViolation, SystemBus};

const HSE_HZ: u32 = 24_000_000;

fn bus_with(latencies: Latencies) -> SystemBus {
    SystemBus::stm32g431(&latencies, HSE_HZ)
}

fn found(bus: &SystemBus) -> Vec<HardwareViolation> {
    bus.violations().iter().map(|r| r.violation.clone()).collect()
}

fn raise_latency(bus: &mut SystemBus) {
    bus.write_u32(flash::ACR, flash::ACR_RESET | 4).unwrap();
    bus.advance(1);
}

fn boost(bus: &mut SystemBus) {
    bus.write_u32(pwr::CR5, 0).unwrap();
}

fn start_pll(bus: &mut SystemBus) {
    bus.write_u32(rcc::CR, rcc::CR_RESET | rcc::CR_HSEON).unwrap();
    bus.advance(1);
    let pll = PllConfig::new(HSE_HZ, 6, 85, 2);
    bus.write_u32(
        rcc::PLLCFGR,
        pll.pllcfgr_bits(rcc::PLLCFGR_PLLSRC_HSE) | rcc::PLLCFGR_PLLREN,
    )
    .unwrap();
    bus.write_u32(rcc::CR, rcc::CR_RESET | rcc::CR_HSEON | rcc::CR_PLLON)
        .unwrap();
    bus.advance(1);
}

fn switch_at_half_rate(bus: &mut SystemBus) {
    bus.write_u32(rcc::CFGR, rcc::CFGR_SW_PLL | rcc::CFGR_HPRE_DIV2)
        .unwrap();
}

fn remove_prescaler(bus: &mut SystemBus) {
    bus.write_u32(rcc::CFGR, rcc::CFGR_SW_PLL).unwrap();
}

#[test]
fn test_correct_sequence_is_clean() {
    let mut bus = bus_with(Latencies::instant());
    raise_latency(&mut bus);
    boost(&mut bus);
    start_pll(&mut bus);
    switch_at_half_rate(&mut bus);
    bus.advance(85);
    remove_prescaler(&mut bus);
    assert!(found(&bus).is_empty(), "{:?}", found(&bus));
    assert_eq!(bus.hclk_hz(), 170_000_000);
}

#[test]
fn test_switch_before_lock() {
    let mut bus = bus_with(Latencies {
        pll_lock: Latency::Cycles(1_000),
        ..Latencies::instant()
    });
    raise_latency(&mut bus);
    boost(&mut bus);
    start_pll(&mut bus);
    let cycle = bus.cycles();
    switch_at_half_rate(&mut bus);

    assert_eq!(found(&bus), vec![HardwareViolation::SwitchBeforeLock]);
    assert_eq!(bus.violations()[0].cycle, cycle);
    // The mux waits for the lock regardless.
    bus.advance(10);
    assert_eq!(bus.hclk_hz(), 8_000_000);
    bus.advance(1_000);
    assert_eq!(bus.hclk_hz(), 85_000_000);
}

#[test]
fn test_missing_flash_latency() {
    let mut bus = bus_with(Latencies::instant());
    boost(&mut bus);
    start_pll(&mut bus);
    switch_at_half_rate(&mut bus);
    // Stays active while HCLK is unchanged, but is recorded once.
    for _ in 0..100 {
        bus.read_u32(rcc::CFGR).unwrap();
    }
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::FlashLatencyTooLow {
            hclk_hz: 85_000_000,
            wait_states: 0,
            required: 2
        }]
    );
}

#[test]
fn test_missing_boost_mode() {
    let mut bus = bus_with(Latencies::instant());
    raise_latency(&mut bus);
    start_pll(&mut bus);
    switch_at_half_rate(&mut bus);
    bus.advance(85);
    assert!(found(&bus).is_empty());
    remove_prescaler(&mut bus);
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::BoostRequired {
            hclk_hz: 170_000_000
        }]
    );
}

#[test]
fn test_switch_without_intermediate_prescaler() {
    let mut bus = bus_with(Latencies::instant());
    raise_latency(&mut bus);
    boost(&mut bus);
    start_pll(&mut bus);
    remove_prescaler(&mut bus);
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::MissingIntermediateStep {
            sysclk_hz: 170_000_000
        }]
    );
}

#[test]
fn test_prescaler_removed_before_switch_completes() {
    let mut bus = bus_with(Latencies {
        sysclk_switch: Latency::Cycles(50),
        ..Latencies::instant()
    });
    raise_latency(&mut bus);
    boost(&mut bus);
    start_pll(&mut bus);
    switch_at_half_rate(&mut bus);
    remove_prescaler(&mut bus);
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::MissingIntermediateStep {
            sysclk_hz: 170_000_000
        }]
    );
}

#[test]
fn test_prescaler_removed_without_settle() {
    let mut bus = bus_with(Latencies::instant());
    raise_latency(&mut bus);
    boost(&mut bus);
    start_pll(&mut bus);
    switch_at_half_rate(&mut bus);
    bus.advance(40);
    remove_prescaler(&mut bus);
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::SettleTooShort {
            cycles: 40,
            required_cycles: 85
        }]
    );
}

#[test]
fn test_pll_reconfigured_while_running() {
    let mut bus = bus_with(Latencies::instant());
    start_pll(&mut bus);
    let before = bus.peek_u32(rcc::PLLCFGR).unwrap();
    bus.write_u32(rcc::PLLCFGR, rcc::PLLCFGR_RESET).unwrap();
    assert_eq!(bus.peek_u32(rcc::PLLCFGR).unwrap(), before);
    assert_eq!(found(&bus), vec![HardwareViolation::PllReconfiguredWhileOn]);
}

#[test]
fn test_pll_enabled_before_reference_ready() {
    let mut bus = bus_with(Latencies {
        hse_ready: Latency::Cycles(500),
        ..Latencies::instant()
    });
    start_pll(&mut bus);
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::PllEnabledWithoutReference {
            reference: ClockSource::Hse
        }]
    );
}

#[test]
fn test_sysclk_source_cannot_be_stopped() {
    let mut bus = bus_with(Latencies::instant());
    bus.write_u32(rcc::CR, 0).unwrap();
    assert_eq!(
        found(&bus),
        vec![HardwareViolation::ClockSourceInUse {
            clock: ClockSource::Hsi
        }]
    );
    assert_ne!(bus.peek_u32(rcc::CR).unwrap() & rcc::CR_HSIRDY, 0);
}

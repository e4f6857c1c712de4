// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! NUCLEO-G431KB: raise SYSCLK to 170 MHz, then blink LD2 (PB8) at 0.5 Hz
//! from the SysTick handler.

#![no_std]
#![no_main]

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use clockup_core::{
    BusyWait, ClockSequencer, DigitalOutput, GpioOutput, Level, OscillatorChoice, PllConfig, Port,
    RegisterBus, RetryBudget, TickScheduler, HSI_HZ, TARGET_HZ,
};
use cortex_m::asm;
use cortex_m::interrupt::{self, Mutex};
use cortex_m_rt::{entry, exception};
use panic_halt as _;

#[cfg(not(feature = "hsi"))]
const OSCILLATOR: OscillatorChoice = OscillatorChoice::External;
#[cfg(feature = "hsi")]
const OSCILLATOR: OscillatorChoice = OscillatorChoice::Internal;

const PLL: PllConfig = match PllConfig::solve(OSCILLATOR.reference_hz(), TARGET_HZ) {
    Ok(pll) => pll,
    Err(_) => panic!("no PLL ratio set reaches the target frequency"),
};

const LED_PORT: Port = Port::B;
const LED_PIN: u8 = 8;

/// HCLK in Hz. Reads HSI16 until bring-up completes.
pub static SYSTEM_CORE_CLOCK: AtomicU32 = AtomicU32::new(HSI_HZ);

static BLINKER: Mutex<RefCell<Option<TickScheduler<GpioOutput<Mmio>>>>> =
    Mutex::new(RefCell::new(None));

/// Volatile access to the memory-mapped peripherals.
#[derive(Debug, Clone, Copy)]
struct Mmio;

impl RegisterBus for Mmio {
    fn read_u32(&mut self, addr: u32) -> u32 {
        // SAFETY: callers only pass peripheral register addresses.
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        // SAFETY: as above.
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }
}

struct CycleSpin;

impl BusyWait for CycleSpin {
    fn wait_cycles(&mut self, cycles: u32) {
        asm::delay(cycles);
    }
}

#[entry]
fn main() -> ! {
    let mut sequencer = ClockSequencer::new(Mmio, RetryBudget::default(), CycleSpin);
    let (clocks, tick) = match sequencer.bring_up_with(PLL, OSCILLATOR) {
        Ok(ready) => ready,
        Err(_) => fail_fast(),
    };
    SYSTEM_CORE_CLOCK.store(clocks.hclk_hz, Ordering::Relaxed);

    let led = match GpioOutput::configure(Mmio, LED_PORT, LED_PIN) {
        Ok(led) => led,
        Err(_) => fail_fast(),
    };
    interrupt::free(|cs| {
        BLINKER
            .borrow(cs)
            .replace(Some(TickScheduler::new(led, Level::Low)));
    });
    tick.arm(&mut Mmio);

    loop {
        asm::wfi();
    }
}

#[exception]
fn SysTick() {
    interrupt::free(|cs| {
        if let Some(blinker) = BLINKER.borrow(cs).borrow_mut().as_mut() {
            blinker.on_tick();
        }
    });
}

/// Bring-up failed: LED solid on, core parked.
fn fail_fast() -> ! {
    if let Ok(mut led) = GpioOutput::configure(Mmio, LED_PORT, LED_PIN) {
        led.set_high();
    }
    loop {
        asm::wfi();
    }
}

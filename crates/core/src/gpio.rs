// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::error::PinError;
use crate::registers::{gpio, rcc, RegisterBus};
use crate::tick::DigitalOutput;

/// GPIO ports present on the STM32G431.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Port {
    pub const ALL: [Port; 7] = [Port::A, Port::B, Port::C, Port::D, Port::E, Port::F, Port::G];

    pub const fn index(self) -> u32 {
        self as u32
    }

    pub const fn base(self) -> u32 {
        gpio::PORT_A_BASE + self.index() * gpio::PORT_STRIDE
    }

    /// GPIOxEN bit in RCC_AHB2ENR.
    pub const fn clock_enable_bit(self) -> u32 {
        1 << self.index()
    }

    pub fn from_letter(letter: char) -> Option<Port> {
        match letter.to_ascii_uppercase() {
            'A' => Some(Port::A),
            'B' => Some(Port::B),
            'C' => Some(Port::C),
            'D' => Some(Port::D),
            'E' => Some(Port::E),
            'F' => Some(Port::F),
            'G' => Some(Port::G),
            _ => None,
        }
    }

    pub const fn letter(self) -> char {
        match self {
            Port::A => 'A',
            Port::B => 'B',
            Port::C => 'C',
            Port::D => 'D',
            Port::E => 'E',
            Port::F => 'F',
            Port::G => 'G',
        }
    }
}

/// One pin configured as a push-pull output, driven through BSRR.
#[derive(Debug, Clone)]
pub struct GpioOutput<B> {
    bus: B,
    port: Port,
    pin: u8,
}

impl<B: RegisterBus> GpioOutput<B> {
    /// Enables the port clock and switches `pin` to general-purpose output.
    pub fn configure(mut bus: B, port: Port, pin: u8) -> Result<Self, PinError> {
        if pin > 15 {
            return Err(PinError::InvalidPin(pin));
        }

        bus.set_bits(rcc::AHB2ENR, port.clock_enable_bit());
        // RM0440 §7.2.17: the enable takes two AHB cycles; the read-back
        // stalls until it has.
        let _ = bus.read_u32(rcc::AHB2ENR);

        let shift = u32::from(pin) * 2;
        bus.modify_u32(port.base() + gpio::MODER, |moder| {
            (moder & !(0b11 << shift)) | (gpio::MODE_OUTPUT << shift)
        });

        Ok(Self { bus, port, pin })
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    fn bsrr(&self) -> u32 {
        self.port.base() + gpio::BSRR
    }
}

impl<B: RegisterBus> DigitalOutput for GpioOutput<B> {
    fn set_high(&mut self) {
        let addr = self.bsrr();
        self.bus.write_u32(addr, 1 << self.pin);
    }

    fn set_low(&mut self) {
        let addr = self.bsrr();
        self.bus.write_u32(addr, 1 << (u32::from(self.pin) + 16));
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! STM32G4 register map used by the bring-up sequence (RM0440) and the
//! [`RegisterBus`] seam the platform implements.

/// 32-bit register access by absolute address.
///
/// The firmware implements this with volatile MMIO; the simulator routes it
/// to its peripheral model. Reads take `&mut self` because simulated time
/// advances on every bus access.
pub trait RegisterBus {
    fn read_u32(&mut self, addr: u32) -> u32;
    fn write_u32(&mut self, addr: u32, value: u32);

    fn modify_u32(&mut self, addr: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read_u32(addr);
        self.write_u32(addr, f(value));
    }

    fn set_bits(&mut self, addr: u32, bits: u32) {
        self.modify_u32(addr, |v| v | bits);
    }

    fn clear_bits(&mut self, addr: u32, bits: u32) {
        self.modify_u32(addr, |v| v & !bits);
    }
}

impl<B: RegisterBus> RegisterBus for &mut B {
    fn read_u32(&mut self, addr: u32) -> u32 {
        (**self).read_u32(addr)
    }

    fn write_u32(&mut self, addr: u32, value: u32) {
        (**self).write_u32(addr, value)
    }
}

pub mod flash {
    pub const BASE: u32 = 0x4002_2000;
    pub const ACR: u32 = BASE;

    pub const ACR_LATENCY_MASK: u32 = 0xF;
    pub const ACR_RESET: u32 = 0x0004_0600;
}

pub mod pwr {
    pub const BASE: u32 = 0x4000_7000;
    pub const CR5: u32 = BASE + 0x80;

    /// Set: range 1 normal mode. Clear: range 1 boost mode.
    pub const CR5_R1MODE: u32 = 1 << 8;
    pub const CR5_RESET: u32 = CR5_R1MODE;
}

pub mod rcc {
    pub const BASE: u32 = 0x4002_1000;
    pub const CR: u32 = BASE;
    pub const CFGR: u32 = BASE + 0x08;
    pub const PLLCFGR: u32 = BASE + 0x0C;
    pub const AHB2ENR: u32 = BASE + 0x4C;

    pub const CR_HSION: u32 = 1 << 8;
    pub const CR_HSIRDY: u32 = 1 << 10;
    pub const CR_HSEON: u32 = 1 << 16;
    pub const CR_HSERDY: u32 = 1 << 17;
    pub const CR_PLLON: u32 = 1 << 24;
    pub const CR_PLLRDY: u32 = 1 << 25;
    pub const CR_RESET: u32 = CR_HSION | CR_HSIRDY;

    pub const CFGR_SW_MASK: u32 = 0b11;
    pub const CFGR_SW_HSI: u32 = 0b01;
    pub const CFGR_SW_HSE: u32 = 0b10;
    pub const CFGR_SW_PLL: u32 = 0b11;
    pub const CFGR_SWS_SHIFT: u32 = 2;
    pub const CFGR_SWS_MASK: u32 = 0b11 << CFGR_SWS_SHIFT;
    pub const CFGR_SWS_PLL: u32 = CFGR_SW_PLL << CFGR_SWS_SHIFT;
    pub const CFGR_HPRE_SHIFT: u32 = 4;
    pub const CFGR_HPRE_MASK: u32 = 0xF << CFGR_HPRE_SHIFT;
    pub const CFGR_HPRE_DIV1: u32 = 0;
    pub const CFGR_HPRE_DIV2: u32 = 0x8 << CFGR_HPRE_SHIFT;
    pub const CFGR_RESET: u32 = CFGR_SW_HSI | (CFGR_SW_HSI << CFGR_SWS_SHIFT);

    pub const PLLCFGR_PLLSRC_MASK: u32 = 0b11;
    pub const PLLCFGR_PLLSRC_HSI: u32 = 0b10;
    pub const PLLCFGR_PLLSRC_HSE: u32 = 0b11;
    pub const PLLCFGR_PLLM_SHIFT: u32 = 4;
    pub const PLLCFGR_PLLM_MASK: u32 = 0xF << PLLCFGR_PLLM_SHIFT;
    pub const PLLCFGR_PLLN_SHIFT: u32 = 8;
    pub const PLLCFGR_PLLN_MASK: u32 = 0x7F << PLLCFGR_PLLN_SHIFT;
    pub const PLLCFGR_PLLREN: u32 = 1 << 24;
    pub const PLLCFGR_PLLR_SHIFT: u32 = 25;
    pub const PLLCFGR_PLLR_MASK: u32 = 0b11 << PLLCFGR_PLLR_SHIFT;
    pub const PLLCFGR_RESET: u32 = 16 << PLLCFGR_PLLN_SHIFT;
}

pub mod systick {
    pub const BASE: u32 = 0xE000_E010;
    pub const CSR: u32 = BASE;
    pub const RVR: u32 = BASE + 0x04;
    pub const CVR: u32 = BASE + 0x08;

    pub const CSR_ENABLE: u32 = 1 << 0;
    pub const CSR_TICKINT: u32 = 1 << 1;
    pub const CSR_CLKSOURCE: u32 = 1 << 2;
    pub const CSR_COUNTFLAG: u32 = 1 << 16;
    pub const RVR_MAX: u32 = 0x00FF_FFFF;
}

pub mod scb {
    pub const SHPR3: u32 = 0xE000_ED20;

    pub const SHPR3_SYSTICK_SHIFT: u32 = 24;
    pub const SHPR3_SYSTICK_MASK: u32 = 0xFF << SHPR3_SYSTICK_SHIFT;
    /// STM32G4 implements four priority bits.
    pub const PRIORITY_BITS: u32 = 4;
}

pub mod gpio {
    pub const PORT_A_BASE: u32 = 0x4800_0000;
    pub const PORT_STRIDE: u32 = 0x400;

    pub const MODER: u32 = 0x00;
    pub const ODR: u32 = 0x14;
    pub const BSRR: u32 = 0x18;
    pub const BRR: u32 = 0x28;

    pub const MODE_OUTPUT: u32 = 0b01;
}

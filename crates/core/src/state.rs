// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Decoded snapshot of the clock domain registers.

use crate::flash::{FlashLatency, RegulatorMode};
use crate::oscillator::HSI_HZ;
use crate::pll::PllConfig;
use crate::registers::{flash, pwr, rcc, RegisterBus};

/// Which oscillator is feeding the clock tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ActiveSource {
    /// HSI16 driving SYSCLK directly, as after reset.
    DefaultInternal,
    /// HSE selected as PLL reference.
    External,
    /// HSI16 selected as PLL reference.
    InternalSelected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PllLock {
    Unlocked,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SysclkSource {
    Hsi,
    Hse,
    Pll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClockDomainState {
    pub source: ActiveSource,
    pub pll_lock: PllLock,
    pub sysclk_source: SysclkSource,
    pub flash_wait_states: u8,
    pub regulator: RegulatorMode,
    pub hsi_on: bool,
    pub hse_on: bool,
    pub ahb_prescaler: u16,
    pub sysclk_hz: u32,
    pub hclk_hz: u32,
}

impl ClockDomainState {
    /// Reads FLASH_ACR, PWR_CR5 and the RCC clock registers. `hse_hz` is the
    /// board's crystal frequency.
    pub fn capture<B: RegisterBus>(bus: &mut B, hse_hz: u32) -> Self {
        let acr = bus.read_u32(flash::ACR);
        let cr5 = bus.read_u32(pwr::CR5);
        let cr = bus.read_u32(rcc::CR);
        let cfgr = bus.read_u32(rcc::CFGR);
        let pllcfgr = bus.read_u32(rcc::PLLCFGR);

        let pll_on = cr & rcc::CR_PLLON != 0;
        let pll_from_hse = pllcfgr & rcc::PLLCFGR_PLLSRC_MASK == rcc::PLLCFGR_PLLSRC_HSE;
        let source = match (pll_on, pll_from_hse) {
            (false, _) => ActiveSource::DefaultInternal,
            (true, true) => ActiveSource::External,
            (true, false) => ActiveSource::InternalSelected,
        };

        let pll_reference = if pll_from_hse { hse_hz } else { HSI_HZ };
        let sws = (cfgr & rcc::CFGR_SWS_MASK) >> rcc::CFGR_SWS_SHIFT;
        let (sysclk_source, sysclk_hz) = match sws {
            rcc::CFGR_SW_HSE => (SysclkSource::Hse, hse_hz),
            rcc::CFGR_SW_PLL => (
                SysclkSource::Pll,
                PllConfig::from_pllcfgr(pllcfgr, pll_reference).output_hz(),
            ),
            _ => (SysclkSource::Hsi, HSI_HZ),
        };

        let ahb_prescaler = ahb_divider(cfgr);
        let regulator = if cr5 & pwr::CR5_R1MODE != 0 {
            RegulatorMode::Normal
        } else {
            RegulatorMode::Boost
        };

        Self {
            source,
            pll_lock: if cr & rcc::CR_PLLRDY != 0 {
                PllLock::Locked
            } else {
                PllLock::Unlocked
            },
            sysclk_source,
            flash_wait_states: (acr & flash::ACR_LATENCY_MASK) as u8,
            regulator,
            hsi_on: cr & rcc::CR_HSION != 0,
            hse_on: cr & rcc::CR_HSEON != 0,
            ahb_prescaler,
            sysclk_hz,
            hclk_hz: sysclk_hz / u32::from(ahb_prescaler),
        }
    }

    pub fn flash_latency(&self) -> FlashLatency {
        FlashLatency(self.flash_wait_states)
    }

    /// True when the flash latency covers the current HCLK in the current
    /// regulator mode.
    pub fn flash_latency_sufficient(&self) -> bool {
        FlashLatency::required(self.hclk_hz, self.regulator)
            .is_some_and(|required| self.flash_latency() >= required)
    }
}

/// Decodes CFGR.HPRE into the AHB divider.
pub fn ahb_divider(cfgr: u32) -> u16 {
    let hpre = (cfgr & rcc::CFGR_HPRE_MASK) >> rcc::CFGR_HPRE_SHIFT;
    match hpre {
        0x8 => 2,
        0x9 => 4,
        0xA => 8,
        0xB => 16,
        0xC => 64,
        0xD => 128,
        0xE => 256,
        0xF => 512,
        _ => 1,
    }
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod flash;
pub mod gpio;
pub mod pwr;
pub mod rcc;
pub mod scb;
pub mod systick;

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! LED waveform export in VCD format, one wire per traced pin.

use anyhow::Context;
use clockup_core::Level;
use clockup_sim::LedTransition;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use vcd::{TimescaleUnit, Value, Writer};

fn value(level: Level) -> Value {
    match level {
        Level::High => Value::V1,
        Level::Low => Value::V0,
    }
}

/// Writes `transitions` as a 1 µs resolution waveform lasting until `end_us`.
/// The wire starts low unless the first transition is at time zero.
pub fn write_led_trace<W: Write>(
    out: W,
    wire: &str,
    transitions: &[LedTransition],
    end_us: u64,
) -> std::io::Result<()> {
    let mut writer = Writer::new(out);
    writer.timescale(1, TimescaleUnit::US)?;
    writer.add_module("nucleo")?;
    let led = writer.add_wire(1, wire)?;
    writer.upscope()?;
    writer.enddefinitions()?;

    let (initial, rest) = match transitions.split_first() {
        Some((first, rest)) if first.at_us == 0 => (first.level, rest),
        _ => (Level::Low, transitions),
    };
    writer.timestamp(0)?;
    writer.change_scalar(led, value(initial))?;

    for transition in rest {
        writer.timestamp(transition.at_us)?;
        writer.change_scalar(led, value(transition.level))?;
    }

    let last = rest.last().map_or(0, |t| t.at_us);
    if end_us > last {
        writer.timestamp(end_us)?;
    }
    Ok(())
}

pub fn write_led_trace_file(
    path: &Path,
    wire: &str,
    transitions: &[LedTransition],
    end_us: u64,
) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut out = BufWriter::new(file);
    write_led_trace(&mut out, wire, transitions, end_us)
        .with_context(|| format!("Failed to write VCD trace {:?}", path))?;
    out.flush()
        .with_context(|| format!("Failed to write VCD trace {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(at_us: u64, level: Level) -> LedTransition {
        LedTransition { at_us, level }
    }

    #[test]
    fn test_trace_contains_every_edge() {
        let mut out = Vec::new();
        let transitions = [
            at(1_000_000, Level::High),
            at(2_000_000, Level::Low),
            at(3_000_000, Level::High),
        ];
        write_led_trace(&mut out, "PB8", &transitions, 3_000_000).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("$timescale"));
        assert!(text.contains("$var wire 1"));
        assert!(text.contains("PB8"));
        for stamp in ["#0", "#1000000", "#2000000", "#3000000"] {
            assert!(text.lines().any(|l| l == stamp), "{stamp} missing:\n{text}");
        }
        assert_eq!(text.matches("#3000000").count(), 1);
    }

    #[test]
    fn test_edge_at_zero_sets_initial_value() {
        let mut out = Vec::new();
        write_led_trace(&mut out, "PB8", &[at(0, Level::High)], 500).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("#0\n").count(), 1);
        assert!(text.lines().any(|l| l == "#500"));
    }
}

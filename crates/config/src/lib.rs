// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0";

/// Default schema version for YAML scenarios
fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    #[error("unsupported schema_version '{0}'; supported versions: '1.0'")]
    SchemaVersion(String),
    #[error("scenario name cannot be empty")]
    EmptyName,
    #[error("invalid frequency '{0}'")]
    Frequency(String),
    #[error("'{field}' must be greater than zero")]
    Zero { field: &'static str },
    #[error("LED pin {0} outside 0..=15")]
    Pin(u8),
    #[error("LED port '{0}' is not one of A..G")]
    Port(char),
}

/// A frequency in Hz. Accepts a plain integer or a string with a unit
/// (`"24MHz"`, `"16 MHz"`, `"32768Hz"`, `"8kHz"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyRepr", into = "u32")]
pub struct Frequency(pub u32);

impl Frequency {
    pub fn hz(self) -> u32 {
        self.0
    }
}

impl From<Frequency> for u32 {
    fn from(freq: Frequency) -> Self {
        freq.0
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hz = self.0;
        if hz >= 1_000_000 && hz % 1_000 == 0 {
            write!(f, "{} MHz", hz as f64 / 1e6)
        } else if hz >= 1_000 && hz % 1_000 == 0 {
            write!(f, "{} kHz", hz / 1_000)
        } else {
            write!(f, "{hz} Hz")
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FrequencyRepr {
    Hz(u32),
    Text(String),
}

impl TryFrom<FrequencyRepr> for Frequency {
    type Error = ScenarioError;

    fn try_from(repr: FrequencyRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            FrequencyRepr::Hz(hz) => Ok(Frequency(hz)),
            FrequencyRepr::Text(text) => parse_frequency(&text).map(Frequency),
        }
    }
}

/// Parses `"170MHz"`, `"16 MHz"`, `"32768Hz"`, `"8khz"` or a bare integer into Hz.
/// Decimal values are accepted only when they land on a whole Hz.
pub fn parse_frequency(text: &str) -> std::result::Result<u32, ScenarioError> {
    let invalid = || ScenarioError::Frequency(text.to_string());
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number = number.replace('_', "");
    let exponent: u32 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "hz" => 0,
        "khz" => 3,
        "mhz" => 6,
        "ghz" => 9,
        _ => return Err(invalid()),
    };

    let (whole, fraction) = number.split_once('.').unwrap_or((&number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let fraction = fraction.trim_end_matches('0');
    let fraction_digits = u32::try_from(fraction.len()).map_err(|_| invalid())?;
    if fraction_digits > exponent {
        return Err(invalid());
    }

    let parse = |digits: &str| -> std::result::Result<u64, ScenarioError> {
        if digits.is_empty() {
            Ok(0)
        } else {
            digits.parse().map_err(|_| invalid())
        }
    };
    let whole_hz = parse(whole)?
        .checked_mul(10u64.pow(exponent))
        .ok_or_else(invalid)?;
    // At most nine fraction digits, so this cannot overflow.
    let fraction_hz = parse(fraction)? * 10u64.pow(exponent - fraction_digits);
    let hz = whole_hz.checked_add(fraction_hz).ok_or_else(invalid)?;
    u32::try_from(hz).map_err(|_| invalid())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OscillatorKind {
    /// 24 MHz crystal on the NUCLEO-G431KB.
    Hse,
    /// Internal 16 MHz RC.
    Hsi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NeverKeyword {
    Never,
}

/// How long a hardware ready flag takes to assert, in bus cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LatencyRepr", into = "LatencyRepr")]
pub enum Latency {
    Cycles(u64),
    Never,
}

impl Latency {
    pub fn cycles(self) -> Option<u64> {
        match self {
            Latency::Cycles(cycles) => Some(cycles),
            Latency::Never => None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum LatencyRepr {
    Cycles(u64),
    Never(NeverKeyword),
}

impl From<LatencyRepr> for Latency {
    fn from(repr: LatencyRepr) -> Self {
        match repr {
            LatencyRepr::Cycles(cycles) => Latency::Cycles(cycles),
            LatencyRepr::Never(NeverKeyword::Never) => Latency::Never,
        }
    }
}

impl From<Latency> for LatencyRepr {
    fn from(latency: Latency) -> Self {
        match latency {
            Latency::Cycles(cycles) => LatencyRepr::Cycles(cycles),
            Latency::Never => LatencyRepr::Never(NeverKeyword::Never),
        }
    }
}

/// Ready-flag latencies for the simulated clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Latencies {
    /// FLASH_ACR.LATENCY read-back lag after a write.
    pub flash_latency: Latency,
    pub hse_ready: Latency,
    /// Also applies at reset: `never` boots with HSIRDY clear.
    pub hsi_ready: Latency,
    pub pll_lock: Latency,
    pub sysclk_switch: Latency,
}

impl Default for Latencies {
    fn default() -> Self {
        Self {
            flash_latency: Latency::Cycles(1),
            // ~200 us at HSI16
            hse_ready: Latency::Cycles(3_200),
            hsi_ready: Latency::Cycles(0),
            pll_lock: Latency::Cycles(1_000),
            sysclk_switch: Latency::Cycles(2),
        }
    }
}

impl Latencies {
    /// Every flag ready on the next cycle.
    pub fn instant() -> Self {
        Self {
            flash_latency: Latency::Cycles(0),
            hse_ready: Latency::Cycles(0),
            hsi_ready: Latency::Cycles(0),
            pll_lock: Latency::Cycles(0),
            sysclk_switch: Latency::Cycles(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub duration_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { duration_ms: 3_000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedConfig {
    pub port: char,
    pub pin: u8,
}

impl Default for LedConfig {
    /// User LED LD2 on the NUCLEO-G431KB.
    fn default() -> Self {
        Self { port: 'B', pin: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialLevel {
    #[default]
    Low,
    High,
}

fn default_target() -> Frequency {
    Frequency(170_000_000)
}

fn default_poll_budget() -> u32 {
    1_000_000
}

/// One simulated bring-up and blink run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub oscillator: OscillatorKind,
    #[serde(default = "default_target")]
    pub target: Frequency,
    /// Overrides the board's nominal frequency for the chosen oscillator.
    #[serde(default)]
    pub reference: Option<Frequency>,
    #[serde(default)]
    pub latencies: Latencies,
    #[serde(default = "default_poll_budget")]
    pub poll_budget: u32,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub led: LedConfig,
    #[serde(default)]
    pub initial_level: InitialLevel,
}

impl Scenario {
    pub fn new(name: impl Into<String>, oscillator: OscillatorKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            name: name.into(),
            oscillator,
            target: default_target(),
            reference: None,
            latencies: Latencies::default(),
            poll_budget: default_poll_budget(),
            run: RunConfig::default(),
            led: LedConfig::default(),
            initial_level: InitialLevel::default(),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario at {:?}", path))?;
        let scenario = Self::from_yaml(&content)
            .with_context(|| format!("Invalid scenario {:?}", path))?;
        tracing::debug!("Loaded scenario '{}' from {:?}", scenario.name, path);
        Ok(scenario)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self = serde_yaml::from_str(yaml).context("Failed to parse scenario YAML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> std::result::Result<(), ScenarioError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ScenarioError::SchemaVersion(self.schema_version.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ScenarioError::EmptyName);
        }
        if self.target.hz() == 0 {
            return Err(ScenarioError::Zero { field: "target" });
        }
        if self.reference.is_some_and(|r| r.hz() == 0) {
            return Err(ScenarioError::Zero { field: "reference" });
        }
        if self.poll_budget == 0 {
            return Err(ScenarioError::Zero {
                field: "poll_budget",
            });
        }
        if self.run.duration_ms == 0 {
            return Err(ScenarioError::Zero {
                field: "run.duration_ms",
            });
        }
        if !('A'..='G').contains(&self.led.port.to_ascii_uppercase()) {
            return Err(ScenarioError::Port(self.led.port));
        }
        if self.led.pin > 15 {
            return Err(ScenarioError::Pin(self.led.pin));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frequency_units() {
        assert_eq!(parse_frequency("24MHz"), Ok(24_000_000));
        assert_eq!(parse_frequency("16 MHz"), Ok(16_000_000));
        assert_eq!(parse_frequency("32768Hz"), Ok(32_768));
        assert_eq!(parse_frequency("8khz"), Ok(8_000));
        assert_eq!(parse_frequency("2.66MHz"), Ok(2_660_000));
        assert_eq!(parse_frequency("0.5MHz"), Ok(500_000));
        assert_eq!(parse_frequency("8.000kHz"), Ok(8_000));
        assert_eq!(parse_frequency("170_000_000"), Ok(170_000_000));
    }

    #[test]
    fn test_parse_frequency_rejects_garbage() {
        assert!(parse_frequency("fast").is_err());
        assert!(parse_frequency("12 parsecs").is_err());
        assert!(parse_frequency("0.5Hz").is_err());
        assert!(parse_frequency("24.0000001MHz").is_err());
        assert!(parse_frequency("1.0000005kHz").is_err());
        assert!(parse_frequency("5GHz").is_err());
        assert!(parse_frequency("1.2.3MHz").is_err());
        assert!(parse_frequency("").is_err());
    }

    #[test]
    fn test_minimal_scenario_uses_defaults() {
        let scenario = Scenario::from_yaml("name: minimal\noscillator: hse\n").unwrap();
        assert_eq!(scenario.schema_version, "1.0");
        assert_eq!(scenario.target, Frequency(170_000_000));
        assert_eq!(scenario.latencies, Latencies::default());
        assert_eq!(scenario.led, LedConfig { port: 'B', pin: 8 });
        assert_eq!(scenario.run.duration_ms, 3_000);
        assert_eq!(scenario.initial_level, InitialLevel::Low);
    }

    #[test]
    fn test_never_latency() {
        let yaml = r#"
name: stuck-pll
oscillator: hsi
latencies:
  pll_lock: never
  hse_ready: 10
"#;
        let scenario = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(scenario.latencies.pll_lock, Latency::Never);
        assert_eq!(scenario.latencies.hse_ready, Latency::Cycles(10));
        assert_eq!(scenario.latencies.sysclk_switch, Latencies::default().sysclk_switch);
    }

    #[test]
    fn test_validation_errors() {
        let mut scenario = Scenario::new("bad", OscillatorKind::Hse);
        scenario.led.pin = 16;
        assert_eq!(scenario.validate(), Err(ScenarioError::Pin(16)));

        let mut scenario = Scenario::new("bad", OscillatorKind::Hse);
        scenario.poll_budget = 0;
        assert_eq!(
            scenario.validate(),
            Err(ScenarioError::Zero {
                field: "poll_budget"
            })
        );

        let mut scenario = Scenario::new("bad", OscillatorKind::Hse);
        scenario.run.duration_ms = 0;
        assert!(scenario.validate().is_err());

        let mut scenario = Scenario::new("bad", OscillatorKind::Hse);
        scenario.led.port = 'Z';
        assert_eq!(scenario.validate(), Err(ScenarioError::Port('Z')));
    }

    #[test]
    fn test_frequency_display() {
        assert_eq!(Frequency(170_000_000).to_string(), "170 MHz");
        assert_eq!(Frequency(2_660_000).to_string(), "2.66 MHz");
        assert_eq!(Frequency(32_768).to_string(), "32768 Hz");
    }
}

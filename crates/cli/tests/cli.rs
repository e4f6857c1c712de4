// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::path::PathBuf;
use std::process::{Command, Output};

fn scenario(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/scenarios")
        .join(name)
}

fn clockup(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_clockup"))
        .args(args)
        .output()
        .expect("Failed to execute clockup")
}

fn run_json(args: &[&str]) -> (Option<i32>, serde_json::Value) {
    let output = clockup(args);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}): {stdout}"));
    (output.status.code(), json)
}

#[test]
fn test_hse_scenario_passes() {
    let path = scenario("nucleo-g431kb-hse.yaml");
    let (code, json) = run_json(&["run", "--scenario", path.to_str().unwrap(), "--json"]);
    assert_eq!(code, Some(0));
    assert_eq!(json["result_schema_version"], "1.0");
    assert_eq!(json["passed"], true);
    assert_eq!(json["clocks"]["sysclk_hz"], 170_000_000);
    let led: Vec<u64> = json["led"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["at_us"].as_u64().unwrap())
        .collect();
    assert_eq!(led, vec![1_000_000, 2_000_000, 3_000_000]);
    assert!(json["violations"].as_array().unwrap().is_empty());
}

#[test]
fn test_duration_override() {
    let path = scenario("nucleo-g431kb-hsi.yaml");
    let (code, json) = run_json(&[
        "run",
        "--scenario",
        path.to_str().unwrap(),
        "--duration-ms",
        "1500",
        "--json",
    ]);
    assert_eq!(code, Some(0));
    assert_eq!(json["duration_ms"], 1500);
    assert_eq!(json["led"].as_array().unwrap().len(), 1);
}

#[test]
fn test_stuck_pll_fails_with_exit_code_1() {
    let path = scenario("stuck-pll.yaml");
    let (code, json) = run_json(&["run", "--scenario", path.to_str().unwrap(), "--json"]);
    assert_eq!(code, Some(1));
    assert_eq!(json["passed"], false);
    assert_eq!(json["failure"]["step"], "pll-lock");
    assert!(json["error"].as_str().unwrap().contains("PLL lock"));
}

#[test]
fn test_missing_scenario_is_config_error() {
    let output = clockup(&["run", "--scenario", "does/not/exist.yaml"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does/not/exist.yaml"), "{stderr}");
}

#[test]
fn test_text_report() {
    let path = scenario("nucleo-g431kb-hse.yaml");
    let output = clockup(&["run", "--scenario", path.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("scenario nucleo-g431kb-hse: PASS"), "{stdout}");
    assert!(stdout.contains("M6 x N85 / R2"), "{stdout}");
    assert!(stdout.contains("LED PB8"), "{stdout}");
    assert!(stdout.contains("1000.000 ms"), "{stdout}");
}

#[test]
fn test_vcd_generation() {
    let vcd_path = std::env::temp_dir().join(format!("clockup-led-{}.vcd", std::process::id()));
    std::fs::remove_file(&vcd_path).ok();

    let path = scenario("nucleo-g431kb-hse.yaml");
    let output = clockup(&[
        "run",
        "--scenario",
        path.to_str().unwrap(),
        "--vcd",
        vcd_path.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let content = std::fs::read_to_string(&vcd_path).expect("Failed to read VCD");
    assert!(content.contains("$timescale"), "VCD header missing");
    assert!(content.contains("$var wire 1"), "LED wire missing");
    assert!(content.lines().any(|l| l == "#2000000"), "{content}");
    std::fs::remove_file(&vcd_path).ok();
}

#[test]
fn test_pll_ratio_sets() {
    let (code, json) = run_json(&[
        "pll",
        "--reference",
        "24MHz",
        "--target",
        "170MHz",
        "--json",
    ]);
    assert_eq!(code, Some(0));
    let sets = json.as_array().unwrap();
    let preferred: Vec<_> = sets.iter().filter(|s| s["preferred"] == true).collect();
    assert_eq!(preferred.len(), 1);
    assert_eq!(preferred[0]["m"], 6);
    assert_eq!(preferred[0]["n"], 85);
    assert_eq!(preferred[0]["r"], 2);
    assert!(sets.iter().all(|s| s["output_hz"] == 170_000_000));
}

#[test]
fn test_pll_without_solution() {
    let output = clockup(&["pll", "--reference", "24MHz", "--target", "170000001"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_bad_frequency_rejected_by_parser() {
    let output = clockup(&["pll", "--reference", "fast"]);
    assert_eq!(output.status.code(), Some(2));
}

// Clockup - Clock bring-up and tick scheduling for STM32G4
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use clockup_config::parse_frequency;
use clockup_core::PllConfig;
use clockup_sim::{Machine, RunReport};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

mod vcd_trace;

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";

fn parse_hz(s: &str) -> Result<u32, String> {
    parse_frequency(s).map_err(|e| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "STM32G4 clock bring-up simulator",
    long_about = None
)]
struct Cli {
    /// Enable register-level tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate bring-up and blinking for a scenario (YAML).
    Run(RunArgs),

    /// List every PLL ratio set that reaches a target exactly.
    Pll(PllArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the scenario file
    #[arg(short = 'c', long)]
    scenario: PathBuf,

    /// Override the run duration (takes precedence over the scenario)
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Write the LED waveform as VCD
    #[arg(long)]
    vcd: Option<PathBuf>,

    /// Print the run report as JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct PllArgs {
    /// PLL input frequency, e.g. 24MHz
    #[arg(long, value_parser = parse_hz)]
    reference: u32,

    /// Desired PLLCLK
    #[arg(long, value_parser = parse_hz, default_value = "170MHz")]
    target: u32,

    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct JsonRunResult<'a> {
    result_schema_version: &'static str,
    #[serde(flatten)]
    report: &'a RunReport,
}

#[derive(Debug, Serialize)]
struct RatioSet {
    m: u8,
    n: u8,
    r: u8,
    vco_input_hz: u32,
    vco_output_hz: u64,
    output_hz: u32,
    /// Solver's pick, the set the bring-up would use.
    preferred: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable.
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run_scenario(args),
        Commands::Pll(args) => list_ratio_sets(args),
    }
}

fn run_scenario(args: RunArgs) -> ExitCode {
    let (mut machine, scenario) = match Machine::from_scenario_file(&args.scenario) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let duration_ms = args.duration_ms.unwrap_or(scenario.run.duration_ms);
    if duration_ms == 0 {
        error!("--duration-ms must be greater than zero");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    info!("Running scenario '{}' for {} ms", scenario.name, duration_ms);
    let report = machine.run(duration_ms);

    if let Some(path) = &args.vcd {
        let config = machine.config();
        let wire = format!("P{}{}", config.led_port.letter(), config.led_pin);
        if let Err(e) =
            vcd_trace::write_led_trace_file(path, &wire, &report.led, duration_ms * 1_000)
        {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        info!("LED waveform written to {:?}", path);
    }

    if args.json {
        let result = JsonRunResult {
            result_schema_version: RESULT_SCHEMA_VERSION,
            report: &report,
        };
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize report: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        print_report(&report, &machine);
    }

    if report.passed {
        ExitCode::from(EXIT_PASS)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}

fn print_report(report: &RunReport, machine: &Machine) {
    let status = if report.passed { "PASS" } else { "FAIL" };
    println!("scenario {}: {}", report.scenario, status);

    if let Some(clocks) = &report.clocks {
        println!(
            "  PLL: {} {} Hz / M{} x N{} / R{} = {} Hz, {} wait states",
            clocks.oscillator.to_uppercase(),
            clocks.reference_hz,
            clocks.pll_m,
            clocks.pll_n,
            clocks.pll_r,
            clocks.sysclk_hz,
            clocks.flash_wait_states
        );
    }
    for step in &report.steps {
        println!("  step {:<20} polls {}", step.step.to_string(), step.polls);
    }
    if let Some(failure) = &report.failure {
        println!("  step {:<20} FAILED: {}", failure.step.to_string(), failure.message);
    } else if let Some(error) = &report.error {
        println!("  error: {}", error);
    }

    let config = machine.config();
    println!("  LED P{}{}:", config.led_port.letter(), config.led_pin);
    if report.led.is_empty() {
        println!("    no transitions");
    }
    for transition in &report.led {
        println!(
            "    {:>10.3} ms  {:?}",
            transition.at_ms(),
            transition.level
        );
    }

    for record in &report.violations {
        println!("  violation at cycle {}: {}", record.cycle, record.violation);
    }
    println!(
        "  {} cycles, final HCLK {} Hz",
        report.cycles, report.final_state.hclk_hz
    );
}

fn list_ratio_sets(args: PllArgs) -> ExitCode {
    let preferred = PllConfig::solve(args.reference, args.target).ok();
    let sets: Vec<RatioSet> = PllConfig::ratio_sets(args.reference, args.target)
        .map(|pll| RatioSet {
            m: pll.m,
            n: pll.n,
            r: pll.r,
            vco_input_hz: pll.vco_input_hz(),
            vco_output_hz: pll.vco_output_hz(),
            output_hz: pll.output_hz(),
            preferred: preferred == Some(pll),
        })
        .collect();

    if sets.is_empty() {
        error!(
            "No PLL ratio set reaches {} Hz from {} Hz",
            args.target, args.reference
        );
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    if args.json {
        match serde_json::to_string_pretty(&sets) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize ratio sets: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        println!("{} Hz -> {} Hz", args.reference, args.target);
        for set in &sets {
            println!(
                "  M={:<2} N={:<3} R={}  VCO in {} Hz, VCO out {} Hz{}",
                set.m,
                set.n,
                set.r,
                set.vco_input_hz,
                set.vco_output_hz,
                if set.preferred { "  (preferred)" } else { "" }
            );
        }
    }
    ExitCode::from(EXIT_PASS)
}

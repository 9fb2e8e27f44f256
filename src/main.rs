//! ONEU protocol simulator
//!
//! Replays a TOML scenario of borrower, depositor, staker and keeper actions
//! against an in-memory protocol instance and prints a JSON report.
//!
//! Environment:
//! - `ONEU_PROFILE`: liquity, testing, or a path to a protocol TOML file
//! - `ONEU_SCENARIO`: scenario path when none is given on the command line
//! - `ONEU_LOG_FORMAT`: `json` for structured log lines on stderr
//! - `RUST_LOG`: tracing filter

mod scenario;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oneu_core::ProtocolConfig;

use crate::scenario::{Scenario, Simulation};

/// Environment variable names.
mod env {
    pub const SCENARIO: &str = "ONEU_SCENARIO";
    pub const LOG_FORMAT: &str = "ONEU_LOG_FORMAT";
}

const DEFAULT_SCENARIO: &str = "scenarios/liquidation.toml";

fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    init_tracing();

    // Use ONEU_PROFILE to select: liquity, testing, or file path
    let config = ProtocolConfig::from_env().context("failed to load protocol profile")?;
    config.log_config();
    let params = config.resolve().context("invalid protocol profile")?;

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(env::SCENARIO).ok())
        .unwrap_or_else(|| DEFAULT_SCENARIO.to_string());
    let scenario = Scenario::from_file(&path)?;
    info!(
        scenario = %scenario.name,
        path = %path,
        steps = scenario.steps.len(),
        "Scenario loaded"
    );
    if let Some(description) = &scenario.description {
        info!("{description}");
    }

    let mut simulation = Simulation::new(params, &scenario)?;
    let report = simulation.run(&scenario);

    info!(
        failed_steps = report.failed_steps,
        active_troves = report.system.active_troves,
        trove_owners = simulation.protocol().trove_count(),
        tcr = %report.system.tcr,
        "Scenario finished"
    );

    let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
    println!("{json}");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,oneu_core=debug"));
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // Logs go to stderr so stdout carries only the report
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Print startup banner.
fn print_banner() {
    eprintln!(
        r#"
    ╔═╗╔╗╔╔═╗╦ ╦  ╔═╗╦╔╦╗
    ║ ║║║║║╣ ║ ║  ╚═╗║║║║
    ╚═╝╝╚╝╚═╝╚═╝  ╚═╝╩╩ ╩
    Protocol Simulator v0.1.0
    "#
    );
}

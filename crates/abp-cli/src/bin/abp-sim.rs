use std::fs;
use std::path::{Path, PathBuf};

use abp_abstract::SimConfigOverride;
use abp_cli::{LogTarget, init_logging};
use abp_simulator::SimulationReport;
use abp_simulator::scenario_runner::{self, DEFAULT_MAX_DURATION_MS};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

/// Run the alternating-bit protocol in the discrete-event simulator.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Scenario file to run; without it a short demo is run.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Write a JSON report of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Override the channel loss rate.
    #[arg(long)]
    loss_rate: Option<f64>,

    /// Override the random seed.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogTarget::Stdout);

    let overrides = SimConfigOverride {
        loss_rate: args.loss_rate,
        seed: args.seed,
        ..Default::default()
    };

    let report = match &args.scenario {
        Some(path) => {
            let scenario = scenario_runner::load_scenario(path)?;
            scenario_runner::execute(&scenario, &overrides)?
        }
        None => run_demo(&overrides)?,
    };

    info!(
        "finished at {} ms: {} chunks delivered, {} frames sent",
        report.duration_ms, report.delivered_chunks, report.sender_frame_count
    );

    if let Some(path) = &args.trace_out {
        write_trace(path, &report)?;
    }
    Ok(())
}

fn run_demo(overrides: &SimConfigOverride) -> Result<SimulationReport> {
    let mut sim = scenario_runner::demo_simulator(overrides)?;
    info!("starting demo simulation");
    sim.init();
    if !sim.run_until(DEFAULT_MAX_DURATION_MS) {
        warn!(
            "demo stopped at {} ms with events still pending",
            DEFAULT_MAX_DURATION_MS
        );
    }
    Ok(sim.export_report())
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("failed to serialize simulation report")?;
    fs::write(path, &data)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    info!("report written to {}", path.display());
    Ok(())
}

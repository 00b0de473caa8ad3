use std::fs;
use std::path::Path;

use abp_abstract::{SimConfig, SimConfigOverride, TestAction, TestAssertion, TestScenario};
use anyhow::{Context, anyhow, bail};
use tracing::{info, warn};

use crate::engine::Simulator;
use crate::nodes::{ReceiverNode, SenderNode};
use crate::trace::SimulationReport;

/// Bound used when a scenario has no `max_duration` assertion.
pub const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

pub fn load_scenario(path: impl AsRef<Path>) -> anyhow::Result<TestScenario> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse scenario file {}", path.display()))
}

pub fn run_scenario(path: impl AsRef<Path>) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(path)?;
    execute(&scenario, &SimConfigOverride::default())
}

/// Build a simulator with the scenario's config and actions applied.
/// `overrides` is applied after the scenario's own `[config]` table.
pub fn build_simulator(
    scenario: &TestScenario,
    overrides: &SimConfigOverride,
) -> anyhow::Result<Simulator> {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    overrides.apply_to(&mut config);

    if config.allows_premature_retransmit() {
        warn!(
            "timeout {} ms is within one round trip; expect duplicate frames",
            config.timeout_ms
        );
    }

    let timeout = config.timeout_ms;
    let mut sim = Simulator::new(config, SenderNode::new(timeout), ReceiverNode::new())
        .with_context(|| format!("invalid config in scenario '{}'", scenario.name))?;

    for action in &scenario.actions {
        match action {
            TestAction::AppSend { time, data } => {
                sim.schedule_app_send(*time, data.as_bytes().to_vec());
            }
            TestAction::DropNextData { seq } => sim.add_drop_next_data(*seq),
            TestAction::DropNextAck { seq } => sim.add_drop_next_ack(*seq),
        }
    }
    Ok(sim)
}

/// Run a scenario to completion and check its assertions.
pub fn execute(
    scenario: &TestScenario,
    overrides: &SimConfigOverride,
) -> anyhow::Result<SimulationReport> {
    info!("running scenario: {}", scenario.name);
    if !scenario.description.is_empty() {
        info!("description: {}", scenario.description);
    }

    let mut sim = build_simulator(scenario, overrides)?;
    sim.init();

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    if !sim.run_until(max_duration) {
        bail!(
            "scenario '{}' did not finish within {} ms ({} of {} bytes delivered)",
            scenario.name,
            max_duration,
            sim.output().len(),
            expected_len(scenario)
        );
    }

    let report = sim.export_report();
    for assertion in &scenario.assertions {
        check(assertion, &report)
            .with_context(|| format!("scenario '{}' failed", scenario.name))?;
    }

    info!(
        "scenario passed in {} ms with {} frames",
        report.duration_ms, report.sender_frame_count
    );
    Ok(report)
}

fn expected_len(scenario: &TestScenario) -> usize {
    scenario
        .actions
        .iter()
        .map(|a| match a {
            TestAction::AppSend { data, .. } => data.len(),
            _ => 0,
        })
        .sum()
}

fn check(assertion: &TestAssertion, report: &SimulationReport) -> anyhow::Result<()> {
    match assertion {
        TestAssertion::OutputEquals { data } => {
            if report.output != *data {
                return Err(anyhow!(
                    "output {:?} does not equal expected {:?}",
                    report.output,
                    data
                ));
            }
        }
        TestAssertion::SenderFrameCount { min, max } => {
            let sent = report.sender_frame_count;
            if sent < *min {
                return Err(anyhow!("sender sent {sent} frames, expected at least {min}"));
            }
            if let Some(max) = max
                && sent > *max
            {
                return Err(anyhow!("sender sent {sent} frames, expected at most {max}"));
            }
        }
        TestAssertion::RoundTrips { count } => {
            let confirmed = report.sender_stats.confirmed;
            if confirmed != *count {
                return Err(anyhow!(
                    "sender completed {confirmed} round trips, expected {count}"
                ));
            }
        }
        // Enforced by the run deadline.
        TestAssertion::MaxDuration { .. } => {}
    }
    Ok(())
}

/// Three short messages over a mildly lossy channel.
pub fn demo_simulator(overrides: &SimConfigOverride) -> anyhow::Result<Simulator> {
    let mut config = SimConfig {
        loss_rate: 0.1,
        min_latency: 100,
        max_latency: 500,
        seed: 42,
        ..Default::default()
    };
    overrides.apply_to(&mut config);

    let timeout = config.timeout_ms;
    let mut sim = Simulator::new(config, SenderNode::new(timeout), ReceiverNode::new())
        .context("invalid demo config")?;
    sim.schedule_app_send(1000, &b"Packet 1"[..]);
    sim.schedule_app_send(2000, &b"Packet 2"[..]);
    sim.schedule_app_send(3000, &b"Packet 3"[..]);
    Ok(sim)
}

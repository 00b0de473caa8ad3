use crate::config::SimConfig;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    pub actions: Vec<TestAction>,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Hand bytes to the sender's input at a specific time
    AppSend { time: u64, data: String },
    /// Drop the next data frame the sender emits with this sequence
    DropNextData { seq: u8 },
    /// Drop the next acknowledgement the receiver emits with this sequence
    DropNextAck { seq: u8 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The receiver's output stream equals `data` exactly
    OutputEquals { data: String },
    /// Total datagrams sent by the sender, retransmissions included
    SenderFrameCount { min: u32, max: Option<u32> },
    /// Number of chunks the sender saw confirmed
    RoundTrips { count: u64 },
    /// The run finishes within this much simulated time
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_with_tagged_actions() {
        let scenario: TestScenario = toml::from_str(
            r#"
            name = "lost ack"

            [config]
            loss_rate = 0.0
            seed = 9

            [[actions]]
            type = "app_send"
            time = 0
            data = "AB"

            [[actions]]
            type = "drop_next_ack"
            seq = 0

            [[assertions]]
            type = "output_equals"
            data = "AB"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.name, "lost ack");
        assert!(scenario.description.is_empty());
        assert_eq!(scenario.actions.len(), 2);
        assert!(matches!(scenario.actions[1], TestAction::DropNextAck { seq: 0 }));

        let mut config = SimConfig::default();
        scenario.config.apply_to(&mut config);
        assert_eq!(config.seed, 9);
        assert_eq!(config.timeout_ms, 2000);
    }
}

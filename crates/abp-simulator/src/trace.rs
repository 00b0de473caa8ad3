use abp_abstract::SimConfig;
use abp_core::{ReceiverStats, SenderStats};
use serde::Serialize;

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ms: u64,
    pub delivered_chunks: usize,
    /// Receiver output, lossily decoded as UTF-8.
    pub output: String,
    pub output_len: usize,
    pub sender_stats: SenderStats,
    pub receiver_stats: ReceiverStats,
    pub sender_frame_count: u32,
    pub link_events: Vec<LinkEventSummary>,
}

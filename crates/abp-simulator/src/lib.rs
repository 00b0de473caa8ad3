//! Discrete-event simulator for the alternating-bit protocol.
//!
//! Runs [`nodes::SenderNode`] and [`nodes::ReceiverNode`] over a virtual
//! channel with seeded loss and latency, so a run is reproducible from its
//! [`abp_abstract::SimConfig`].

pub mod engine;
pub mod interface;
pub mod nodes;
pub mod scenario_runner;
pub mod trace;

pub use engine::{LinkEventSummary, NodeId, Simulator};
pub use interface::{ProtocolNode, SystemContext};
pub use nodes::{ReceiverNode, SenderNode};
pub use trace::SimulationReport;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use abp_abstract::{ConfigError, Frame, SimConfig};
use abp_core::{Direction, LossModel, LossProbability, Verdict};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::interface::{ProtocolNode, SystemContext};
use crate::nodes::{ReceiverNode, SenderNode};
use crate::trace::SimulationReport;

/// Latency draws use their own stream so the loss sequence for a seed does
/// not depend on the latency range.
const LATENCY_STREAM: u64 = 0x9e37_79b9_7f4a_7c15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Sender,
    Receiver,
}

impl NodeId {
    pub fn peer(&self) -> Self {
        match self {
            NodeId::Sender => NodeId::Receiver,
            NodeId::Receiver => NodeId::Sender,
        }
    }

    fn direction(&self) -> Direction {
        match self {
            NodeId::Sender => Direction::SenderToReceiver,
            NodeId::Receiver => Direction::ReceiverToSender,
        }
    }
}

#[derive(Debug)]
pub enum EventType {
    DatagramArrival {
        to: NodeId,
        datagram: Bytes,
    },
    TimerExpiry {
        node: NodeId,
        timer_id: u32,
        generation: u64,
    },
    AppSend {
        data: Bytes,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    // Breaks ties between events scheduled for the same time.
    id: u64,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the earliest event is the heap maximum.
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// One line of the link timeline.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Actions a node requested while handling one event.
#[derive(Default)]
struct ActionBuffer {
    outgoing: Vec<Bytes>,
    timers_start: Vec<(u64, u32)>,
    timers_cancel: Vec<u32>,
    logs: Vec<String>,
    delivered: Vec<Vec<u8>>,
}

struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl SystemContext for ScopedContext<'_> {
    fn send_datagram(&mut self, datagram: Bytes) {
        self.buffer.outgoing.push(datagram);
    }

    fn start_timer(&mut self, delay_ms: u64, timer_id: u32) {
        self.buffer.timers_start.push((delay_ms, timer_id));
    }

    fn cancel_timer(&mut self, timer_id: u32) {
        self.buffer.timers_cancel.push(timer_id);
    }

    fn deliver_data(&mut self, data: &[u8]) {
        self.buffer.delivered.push(data.to_vec());
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }

    fn now(&self) -> u64 {
        self.now
    }
}

/// Short human description of a datagram for the timeline.
fn describe(datagram: &[u8]) -> String {
    match Frame::decode(datagram) {
        Ok(Frame::Data { seq, payload }) => format!("DATA seq={seq} len={}", payload.len()),
        Ok(Frame::Ack { seq }) => format!("ACK seq={seq}"),
        Err(_) if datagram.is_empty() => "EMPTY".to_string(),
        Err(e) => format!("INVALID ({e})"),
    }
}

pub struct Simulator<S = SenderNode, R = ReceiverNode> {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    loss: LossModel,
    latency_rng: StdRng,

    pub sender: S,
    pub receiver: R,

    /// Chunks the receiver handed to its application, in order.
    pub delivered_data: Vec<Vec<u8>>,
    /// Datagrams emitted by the sender, retransmissions included.
    pub sender_frame_count: u32,

    // One-shot deterministic drops keyed by sequence.
    drop_next_data: Vec<u8>,
    drop_next_ack: Vec<u8>,

    pub link_events: Vec<LinkEventSummary>,

    // Cancelling bumps the generation; expiries carrying an older one are
    // skipped.
    timer_generations: HashMap<(NodeId, u32), u64>,
}

impl<S: ProtocolNode, R: ProtocolNode> Simulator<S, R> {
    pub fn new(config: SimConfig, sender: S, receiver: R) -> Result<Self, ConfigError> {
        config.validate()?;
        let probability =
            LossProbability::new(config.loss_rate).map_err(|_| ConfigError::LossRate(config.loss_rate))?;

        Ok(Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            loss: LossModel::seeded(probability, config.seed),
            latency_rng: StdRng::seed_from_u64(config.seed ^ LATENCY_STREAM),
            config,
            sender,
            receiver,
            delivered_data: Vec::new(),
            sender_frame_count: 0,
            drop_next_data: Vec::new(),
            drop_next_ack: Vec::new(),
            link_events: Vec::new(),
            timer_generations: HashMap::new(),
        })
    }

    /// Drop the first data frame the sender emits with sequence `seq`.
    pub fn add_drop_next_data(&mut self, seq: u8) {
        self.drop_next_data.push(seq);
    }

    /// Drop the first acknowledgement the receiver emits with sequence `seq`.
    pub fn add_drop_next_ack(&mut self, seq: u8) {
        self.drop_next_ack.push(seq);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    /// Time of the next live event. Cancelled timer expiries at the head of
    /// the queue are discarded first.
    pub fn peek_next_event_time(&mut self) -> Option<u64> {
        self.prune_cancelled_head();
        self.event_queue.peek().map(|e| e.time)
    }

    fn is_stale(&self, event: &Event) -> bool {
        match &event.event_type {
            EventType::TimerExpiry {
                node,
                timer_id,
                generation,
            } => self.timer_generations.get(&(*node, *timer_id)) != Some(generation),
            _ => false,
        }
    }

    fn prune_cancelled_head(&mut self) {
        while let Some(head) = self.event_queue.peek() {
            if !self.is_stale(head) {
                break;
            }
            debug!(time = head.time, "skipping cancelled timer");
            self.event_queue.pop();
        }
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Everything delivered so far, concatenated.
    pub fn output(&self) -> Vec<u8> {
        self.delivered_data.concat()
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_app_send(&mut self, time: u64, data: impl Into<Bytes>) {
        self.push_event(time, EventType::AppSend { data: data.into() });
    }

    fn dispatch<F>(&mut self, node: NodeId, f: F)
    where
        F: FnOnce(&mut dyn ProtocolNode, &mut dyn SystemContext),
    {
        let mut buffer = ActionBuffer::default();
        {
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            match node {
                NodeId::Sender => f(&mut self.sender, &mut ctx),
                NodeId::Receiver => f(&mut self.receiver, &mut ctx),
            }
        }
        self.process_actions(node, buffer);
    }

    pub fn init(&mut self) {
        self.dispatch(NodeId::Sender, |node, ctx| node.init(ctx));
        self.dispatch(NodeId::Receiver, |node, ctx| node.init(ctx));
    }

    /// Process the next event. Returns false once the queue is empty.
    pub fn step(&mut self) -> bool {
        self.prune_cancelled_head();
        let Some(event) = self.event_queue.pop() else {
            return false;
        };

        self.time = event.time;
        debug!("processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::DatagramArrival { to, datagram } => {
                self.dispatch(to, |node, ctx| node.on_datagram(ctx, &datagram));
            }
            EventType::TimerExpiry { node, timer_id, .. } => {
                self.dispatch(node, |n, ctx| n.on_timer(ctx, timer_id));
            }
            EventType::AppSend { data } => {
                self.dispatch(NodeId::Sender, |node, ctx| node.on_app_data(ctx, &data));
            }
        }
        true
    }

    pub fn run_until_complete(&mut self) {
        self.init();
        while self.step() {}
    }

    /// Process events up to `deadline_ms`. Returns true if the queue drained
    /// first; false if events remain past the deadline, which is how a run
    /// that retransmits forever is bounded.
    pub fn run_until(&mut self, deadline_ms: u64) -> bool {
        while let Some(next) = self.peek_next_event_time() {
            if next > deadline_ms {
                self.time = deadline_ms;
                return false;
            }
            self.step();
        }
        true
    }

    fn record(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }

    fn process_actions(&mut self, source: NodeId, buffer: ActionBuffer) {
        for log in buffer.logs {
            info!("[{:?}] {}", source, log);
        }

        for data in buffer.delivered {
            info!("[{:?}] delivered {} bytes", source, data.len());
            self.record(format!("[{:?}] DELIVERED {} bytes", source, data.len()));
            self.delivered_data.push(data);
        }

        for timer_id in buffer.timers_cancel {
            *self.timer_generations.entry((source, timer_id)).or_insert(0) += 1;
        }

        for (delay, timer_id) in buffer.timers_start {
            let generation = *self.timer_generations.entry((source, timer_id)).or_insert(0);
            self.push_event(
                self.time + delay,
                EventType::TimerExpiry {
                    node: source,
                    timer_id,
                    generation,
                },
            );
        }

        let direction = source.direction();
        for datagram in buffer.outgoing {
            let frame = Frame::decode(&datagram).ok();
            if source == NodeId::Sender {
                self.sender_frame_count += 1;
            }

            let one_shot = match (source, &frame) {
                (NodeId::Sender, Some(Frame::Data { seq, .. })) => {
                    take_first(&mut self.drop_next_data, *seq)
                }
                (NodeId::Receiver, Some(Frame::Ack { seq })) => {
                    take_first(&mut self.drop_next_ack, *seq)
                }
                _ => false,
            };
            if one_shot {
                debug!("deterministic drop: {}", describe(&datagram));
                self.record(format!("[{direction}] DROP (deterministic) {}", describe(&datagram)));
                continue;
            }

            if self.loss.decide() == Verdict::Lost {
                debug!("random loss: {}", describe(&datagram));
                self.record(format!("[{direction}] DROP (random loss) {}", describe(&datagram)));
                continue;
            }

            let latency = self
                .latency_rng
                .random_range(self.config.min_latency..=self.config.max_latency);
            self.record(format!(
                "[{direction}] SEND {} (latency={latency}ms)",
                describe(&datagram)
            ));
            self.push_event(
                self.time + latency,
                EventType::DatagramArrival {
                    to: source.peer(),
                    datagram,
                },
            );
        }
    }
}

fn take_first(pending: &mut Vec<u8>, seq: u8) -> bool {
    match pending.iter().position(|s| *s == seq) {
        Some(pos) => {
            pending.remove(pos);
            true
        }
        None => false,
    }
}

impl Simulator<SenderNode, ReceiverNode> {
    /// Serializable snapshot of the run so far.
    pub fn export_report(&self) -> SimulationReport {
        let output = self.output();
        SimulationReport {
            config: self.config.clone(),
            duration_ms: self.time,
            delivered_chunks: self.delivered_data.len(),
            output: String::from_utf8_lossy(&output).into_owned(),
            output_len: output.len(),
            sender_stats: *self.sender.stats(),
            receiver_stats: *self.receiver.stats(),
            sender_frame_count: self.sender_frame_count,
            link_events: self.link_events.clone(),
        }
    }
}

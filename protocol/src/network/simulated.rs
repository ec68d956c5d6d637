//! Deterministic in-process transport for tests and benches.
//!
//! Sends only enqueue. Nothing is delivered until the owner calls
//! [`SimulatedNetwork::step`] or [`SimulatedNetwork::pump`], which hand
//! messages to engines outside of any engine call stack. With a fixed seed
//! every run delivers in the same order, including the reordered and
//! duplicated ones.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::transport::{Transport, TransportError};
use crate::consensus::engine::ConsensusEngine;
use crate::consensus::message::ConsensusMessage;
use crate::ledger::IntegrityFault;

/// Upper bound on deliveries per [`SimulatedNetwork::pump`] call.
const MAX_PUMP_STEPS: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub seed: u64,
    /// Deliver a random queued message instead of the oldest.
    pub reorder: bool,
    /// Chance that a send is enqueued twice. Clamped to `[0, 1]`.
    pub duplicate_probability: f64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            reorder: false,
            duplicate_probability: 0.0,
        }
    }
}

#[derive(Debug)]
struct Envelope {
    to: String,
    message: ConsensusMessage,
}

#[derive(Debug)]
struct SimState {
    peers: BTreeSet<String>,
    isolated: HashSet<String>,
    queue: VecDeque<Envelope>,
    rng: StdRng,
    delivered: u64,
    lost: u64,
}

#[derive(Debug)]
pub struct SimulatedNetwork {
    state: Mutex<SimState>,
    options: SimulationOptions,
}

impl SimulatedNetwork {
    pub fn new<I, S>(peers: I, options: SimulationOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            state: Mutex::new(SimState {
                peers: peers.into_iter().map(Into::into).collect(),
                isolated: HashSet::new(),
                queue: VecDeque::new(),
                rng: StdRng::seed_from_u64(options.seed),
                delivered: 0,
                lost: 0,
            }),
            options,
        }
    }

    /// Cuts `node` off: nothing it sends or is sent is delivered.
    pub fn isolate(&self, node: &str) {
        self.state.lock().isolated.insert(node.to_string());
    }

    pub fn heal(&self, node: &str) {
        self.state.lock().isolated.remove(node);
    }

    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    /// Messages discarded because an endpoint was isolated.
    pub fn lost(&self) -> u64 {
        self.state.lock().lost
    }

    /// Enqueues `message` for `node` directly, bypassing isolation.
    pub fn inject(&self, node: &str, message: ConsensusMessage) {
        self.state.lock().queue.push_back(Envelope {
            to: node.to_string(),
            message,
        });
    }

    /// Drops everything still queued.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let n = state.queue.len();
        state.queue.clear();
        n
    }

    fn next(&self) -> Option<Envelope> {
        let mut state = self.state.lock();
        loop {
            let envelope = if self.options.reorder && state.queue.len() > 1 {
                let len = state.queue.len();
                let index = state.rng.gen_range(0..len);
                state.queue.swap_remove_back(index)
            } else {
                state.queue.pop_front()
            }?;
            if state.isolated.contains(&envelope.to) {
                state.lost += 1;
                continue;
            }
            state.delivered += 1;
            return Some(envelope);
        }
    }

    /// Delivers one message. `None` when the queue is empty.
    pub fn step(&self, engines: &[Arc<ConsensusEngine>]) -> Option<Result<(), IntegrityFault>> {
        let envelope = self.next()?;
        let result = match engines.iter().find(|e| e.node_id() == envelope.to) {
            Some(engine) => engine.on_message(envelope.message),
            None => {
                trace!(to = %envelope.to, "no engine registered, message discarded");
                Ok(())
            }
        };
        Some(result)
    }

    /// Delivers until the queue is empty. Returns the number delivered.
    pub fn pump(&self, engines: &[Arc<ConsensusEngine>]) -> Result<usize, IntegrityFault> {
        let by_id: HashMap<&str, &Arc<ConsensusEngine>> =
            engines.iter().map(|e| (e.node_id(), e)).collect();
        let mut delivered = 0;
        while delivered < MAX_PUMP_STEPS {
            let Some(envelope) = self.next() else {
                break;
            };
            if let Some(engine) = by_id.get(envelope.to.as_str()) {
                engine.on_message(envelope.message)?;
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    fn enqueue(&self, state: &mut SimState, to: &str, message: &ConsensusMessage) {
        state.queue.push_back(Envelope {
            to: to.to_string(),
            message: message.clone(),
        });
        let p = self.options.duplicate_probability.clamp(0.0, 1.0);
        if p > 0.0 && state.rng.gen_bool(p) {
            state.queue.push_back(Envelope {
                to: to.to_string(),
                message: message.clone(),
            });
        }
    }
}

impl Transport for SimulatedNetwork {
    fn broadcast(
        &self,
        message: &ConsensusMessage,
        exclude_sender: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let sender = message.sender();
        if state.isolated.contains(sender) {
            state.lost += 1;
            return Ok(());
        }
        let targets: Vec<String> = state
            .peers
            .iter()
            .filter(|peer| !(exclude_sender && peer.as_str() == sender))
            .cloned()
            .collect();
        for peer in targets {
            self.enqueue(&mut state, &peer, message);
        }
        Ok(())
    }

    fn send_to(&self, node: &str, message: &ConsensusMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.peers.contains(node) {
            return Err(TransportError::UnknownPeer(node.to_string()));
        }
        if state.isolated.contains(message.sender()) {
            state.lost += 1;
            return Ok(());
        }
        self.enqueue(&mut state, node, message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::message::Vote;

    fn vote(sender: &str, view: u64) -> ConsensusMessage {
        ConsensusMessage::Vote(Vote {
            view,
            block_hash: [0u8; 32],
            sender: sender.into(),
            ack: String::new(),
        })
    }

    #[test]
    fn broadcast_enqueues_for_every_other_peer() {
        let net = SimulatedNetwork::new(["A", "B", "C"], SimulationOptions::default());
        net.broadcast(&vote("A", 0), true).unwrap();
        assert_eq!(net.pending(), 2);
        net.broadcast(&vote("A", 1), false).unwrap();
        assert_eq!(net.pending(), 5);
    }

    #[test]
    fn isolated_sender_is_silenced() {
        let net = SimulatedNetwork::new(["A", "B"], SimulationOptions::default());
        net.isolate("A");
        net.broadcast(&vote("A", 0), true).unwrap();
        assert_eq!(net.pending(), 0);
        assert_eq!(net.lost(), 1);
        net.heal("A");
        net.broadcast(&vote("A", 0), true).unwrap();
        assert_eq!(net.pending(), 1);
    }

    #[test]
    fn isolated_recipient_loses_queued_messages() {
        let net = SimulatedNetwork::new(["A", "B"], SimulationOptions::default());
        net.broadcast(&vote("A", 0), true).unwrap();
        net.isolate("B");
        assert_eq!(net.pump(&[]).unwrap(), 0);
        assert_eq!(net.lost(), 1);
    }

    #[test]
    fn duplication_is_seeded() {
        let opts = SimulationOptions {
            seed: 7,
            reorder: true,
            duplicate_probability: 0.5,
        };
        let a = SimulatedNetwork::new(["A", "B", "C", "D"], opts.clone());
        let b = SimulatedNetwork::new(["A", "B", "C", "D"], opts);
        for view in 0..20 {
            a.broadcast(&vote("A", view), true).unwrap();
            b.broadcast(&vote("A", view), true).unwrap();
        }
        assert_eq!(a.pending(), b.pending());
        assert!(a.pending() > 60);
    }

    #[test]
    fn send_to_unknown_peer_fails() {
        let net = SimulatedNetwork::new(["A"], SimulationOptions::default());
        assert_eq!(
            net.send_to("Z", &vote("A", 0)),
            Err(TransportError::UnknownPeer("Z".into()))
        );
    }
}

//! In-process transport over tokio channels.
//!
//! Every replica owns one unbounded mailbox. Messages travel as bincode
//! frames, so a replica only ever sees what survives a decode. A send to a
//! disconnected replica is silently lost, which is how a crashed node looks
//! to its peers.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::transport::{Transport, TransportError};
use crate::consensus::message::ConsensusMessage;

/// Receiving half of one replica's mailbox.
#[derive(Debug)]
pub struct Mailbox {
    node: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Mailbox {
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Next message, or `None` once the replica has been disconnected and
    /// its queue is drained. Undecodable frames come back as
    /// [`TransportError::Codec`].
    pub async fn recv(&mut self) -> Option<Result<ConsensusMessage, TransportError>> {
        let frame = self.rx.recv().await?;
        Some(ConsensusMessage::decode(&frame).map_err(TransportError::from))
    }

    /// Non-blocking variant of [`Mailbox::recv`].
    pub fn try_recv(&mut self) -> Option<Result<ConsensusMessage, TransportError>> {
        let frame = self.rx.try_recv().ok()?;
        Some(ConsensusMessage::decode(&frame).map_err(TransportError::from))
    }
}

/// Registry of replica mailboxes.
#[derive(Debug, Default)]
pub struct ChannelNetwork {
    peers: DashMap<String, mpsc::UnboundedSender<Vec<u8>>>,
    frames_sent: AtomicU64,
}

impl ChannelNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the mailbox for `node`. Registering again replaces the old
    /// mailbox.
    pub fn register(&self, node: impl Into<String>) -> Mailbox {
        let node = node.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(node.clone(), tx);
        debug!(node = %node, "mailbox registered");
        Mailbox { node, rx }
    }

    /// Removes `node` from the network. Its runner sees the mailbox close.
    pub fn disconnect(&self, node: &str) -> bool {
        let removed = self.peers.remove(node).is_some();
        if removed {
            debug!(node, "mailbox disconnected");
        }
        removed
    }

    pub fn is_connected(&self, node: &str) -> bool {
        self.peers.contains_key(node)
    }

    pub fn peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Injects a raw frame, bypassing the encoder.
    pub fn send_raw(&self, node: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let sender = self
            .peers
            .get(node)
            .ok_or_else(|| TransportError::UnknownPeer(node.to_string()))?;
        sender
            .send(frame)
            .map_err(|_| TransportError::Closed(node.to_string()))?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Transport for ChannelNetwork {
    fn broadcast(
        &self,
        message: &ConsensusMessage,
        exclude_sender: bool,
    ) -> Result<(), TransportError> {
        let frame = message.encode()?;
        for entry in self.peers.iter() {
            if exclude_sender && entry.key() == message.sender() {
                continue;
            }
            if entry.value().send(frame.clone()).is_err() {
                trace!(to = %entry.key(), "mailbox closed, frame lost");
                continue;
            }
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn send_to(&self, node: &str, message: &ConsensusMessage) -> Result<(), TransportError> {
        self.send_raw(node, message.encode()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::message::Vote;

    fn vote(sender: &str) -> ConsensusMessage {
        ConsensusMessage::Vote(Vote {
            view: 1,
            block_hash: [1u8; 32],
            sender: sender.into(),
            ack: "00".into(),
        })
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let net = ChannelNetwork::new();
        let mut a = net.register("A");
        let mut b = net.register("B");

        net.broadcast(&vote("A"), true).unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap(), vote("A"));
        assert!(a.try_recv().is_none());
        assert_eq!(net.frames_sent(), 1);
    }

    #[tokio::test]
    async fn broadcast_including_sender() {
        let net = ChannelNetwork::new();
        let mut a = net.register("A");
        net.broadcast(&vote("A"), false).unwrap();
        assert!(a.recv().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let net = ChannelNetwork::new();
        assert_eq!(
            net.send_to("ghost", &vote("A")),
            Err(TransportError::UnknownPeer("ghost".into()))
        );
    }

    #[tokio::test]
    async fn garbage_frame_surfaces_as_codec_error() {
        let net = ChannelNetwork::new();
        let mut a = net.register("A");
        net.send_raw("A", vec![9, 9, 9, 9, 9]).unwrap();
        assert!(matches!(a.recv().await, Some(Err(TransportError::Codec(_)))));
    }

    #[tokio::test]
    async fn disconnect_closes_mailbox() {
        let net = ChannelNetwork::new();
        let mut a = net.register("A");
        let _b = net.register("B");
        assert!(net.disconnect("A"));
        assert!(!net.is_connected("A"));
        assert!(a.recv().await.is_none());

        // Broadcasts still reach the survivors.
        net.broadcast(&vote("B"), false).unwrap();
        assert_eq!(net.peers(), vec!["B".to_string()]);
    }
}

//! The delivery contract the engine depends on.
//!
//! Implementations must eventually deliver to every live replica but may
//! reorder or duplicate. They must not call back into the sending engine
//! from inside `broadcast` or `send_to`.

use thiserror::Error;

use crate::consensus::message::ConsensusMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no mailbox registered for {0}")]
    UnknownPeer(String),

    #[error("mailbox of {0} is closed")]
    Closed(String),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Message delivery between replicas.
pub trait Transport: Send + Sync {
    /// Sends `message` to every registered replica, skipping its sender when
    /// `exclude_sender` is set.
    fn broadcast(&self, message: &ConsensusMessage, exclude_sender: bool)
        -> Result<(), TransportError>;

    fn send_to(&self, node: &str, message: &ConsensusMessage) -> Result<(), TransportError>;
}

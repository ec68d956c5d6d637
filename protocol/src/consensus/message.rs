//! Wire messages exchanged between replicas.
//!
//! The set is closed: a replica only ever receives a [`Proposal`] or a
//! [`Vote`]. Frames that do not decode into one of them never reach the
//! engine.

use serde::{Deserialize, Serialize};

use super::certificate::QuorumCertificate;
use super::signer::Ack;
use crate::crypto::hash::short_hex;
use crate::ledger::{Block, BlockHash};

/// A leader's block for one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub view: u64,
    pub block: Block,
    /// Certificate of the block's parent. Mirrors `block.parent_qc`.
    pub parent_qc: QuorumCertificate,
    pub sender: String,
}

/// One validator's acknowledgement of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub view: u64,
    pub block_hash: BlockHash,
    pub sender: String,
    /// Signer output over `vote_payload(view, block_hash)`.
    pub ack: Ack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Propose(Proposal),
    Vote(Vote),
}

impl ConsensusMessage {
    pub fn sender(&self) -> &str {
        match self {
            Self::Propose(p) => &p.sender,
            Self::Vote(v) => &v.sender,
        }
    }

    pub fn view(&self) -> u64 {
        match self {
            Self::Propose(p) => p.view,
            Self::Vote(v) => v.view,
        }
    }

    /// Short type tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Propose(_) => "propose",
            Self::Vote(_) => "vote",
        }
    }

    /// Hash of the block the message is about.
    pub fn block_hash(&self) -> &BlockHash {
        match self {
            Self::Propose(p) => &p.block.hash,
            Self::Vote(v) => &v.block_hash,
        }
    }

    pub fn short_hash(&self) -> String {
        short_hex(self.block_hash())
    }

    /// Bincode frame.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

impl From<Proposal> for ConsensusMessage {
    fn from(p: Proposal) -> Self {
        Self::Propose(p)
    }
}

impl From<Vote> for ConsensusMessage {
    fn from(v: Vote) -> Self {
        Self::Vote(v)
    }
}

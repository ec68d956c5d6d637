//! # Replica State Machine
//!
//! One [`ConsensusEngine`] per validator. It proposes when it is the
//! primary of its current view, validates and votes on proposals, tallies
//! votes into quorum certificates and applies the commit rule.
//!
//! ## Commit Rule
//!
//! ```text
//!   committed ← G ← P ← C
//!                   │   └── QC(C) just formed or learnt
//!                   └────── QC(P) on record, P.parent_qc names G
//! ```
//!
//! When `QC(C)` is processed and `C` is known, its parent `P` commits if
//! `QC(P)` is on record, `QC(C)` was formed in the view right after
//! `QC(P)`, and `P`'s parent certificate names the block of
//! `high_commit_qc`. Certified ancestors of `P` that are still pending are
//! committed first, oldest first, so a replica that missed one round
//! catches up on the next.
//!
//! ## Voting Lock
//!
//! A replica remembers the highest parent-certificate view among the
//! blocks it voted for and refuses proposals whose parent certificate is
//! older. With the direct-chain condition above, a quorum that certified
//! `C` can never certify a block that forks away from `P`, even after
//! externally bumped views.
//!
//! ## Locking
//!
//! All handlers run under one per-replica mutex. The ledger has its own
//! lock, always taken after the replica lock. Outbound messages and commit
//! notifications are collected under the lock and dispatched after it is
//! released, so a transport can never re-enter the engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::certificate::{vote_payload, QuorumCertificate};
use super::error::ConsensusError;
use super::message::{ConsensusMessage, Proposal, Vote};
use super::signer::{Ack, Signer};
use super::validator_set::ValidatorSet;
use crate::config::{ConsensusConfig, MAX_POW_DIFFICULTY, MAX_SEAL_ATTEMPTS};
use crate::crypto::hash::{short_hex, to_hex};
use crate::institution::TransactionSource;
use crate::ledger::{
    Balances, Block, BlockHash, IntegrityFault, Ledger, LedgerError, Persistence, SharedLedger,
};
use crate::network::Transport;

// ---------------------------------------------------------------------------
// Observability
// ---------------------------------------------------------------------------

/// Snapshot for dashboards and the node API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub node_id: String,
    pub current_view: u64,
    pub high_qc_view: u64,
    pub high_commit_qc_view: u64,
    pub locked_view: u64,
    /// Height of the last block this replica committed.
    pub committed_height: u64,
    pub pending_blocks: usize,
    pub running: bool,
    /// Integrity fault that halted the replica, if any.
    pub fault: Option<String>,
}

/// Monotonic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub proposals: u64,
    pub votes_cast: u64,
    pub certificates_formed: u64,
    pub blocks_committed: u64,
    pub transactions_committed: u64,
    pub messages_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    proposals: AtomicU64,
    votes_cast: AtomicU64,
    certificates_formed: AtomicU64,
    blocks_committed: AtomicU64,
    transactions_committed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            proposals: self.proposals.load(Ordering::Relaxed),
            votes_cast: self.votes_cast.load(Ordering::Relaxed),
            certificates_formed: self.certificates_formed.load(Ordering::Relaxed),
            blocks_committed: self.blocks_committed.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Replica State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct VoteTally {
    view: u64,
    acks: BTreeMap<String, Ack>,
    certified: bool,
}

#[derive(Debug)]
struct ReplicaState {
    current_view: u64,
    high_qc: QuorumCertificate,
    high_commit_qc: QuorumCertificate,
    committed_height: u64,
    /// Uncommitted blocks this replica has accepted or proposed.
    pending_blocks: HashMap<BlockHash, Block>,
    /// Certificates on record for uncommitted blocks, formed locally or
    /// learnt from proposals. May name blocks not yet seen.
    certificates: HashMap<BlockHash, QuorumCertificate>,
    votes: HashMap<BlockHash, VoteTally>,
    last_proposed_view: Option<u64>,
    last_voted_view: Option<u64>,
    /// Highest `parent_qc.view` of any block this replica voted for.
    locked_view: u64,
    fault: Option<IntegrityFault>,
}

/// Work produced under the replica lock, performed after it is released.
#[derive(Default)]
struct Effects {
    outbound: Vec<ConsensusMessage>,
    committed: Vec<Block>,
}

// ---------------------------------------------------------------------------
// ConsensusEngine
// ---------------------------------------------------------------------------

pub struct ConsensusEngine {
    id: String,
    validators: ValidatorSet,
    ledger: SharedLedger,
    transport: Arc<dyn Transport>,
    source: Arc<dyn TransactionSource>,
    signer: Arc<dyn Signer>,
    persistence: Option<Arc<dyn Persistence>>,
    config: ConsensusConfig,
    genesis_hash: BlockHash,
    state: Mutex<ReplicaState>,
    running: AtomicBool,
    counters: Counters,
}

impl ConsensusEngine {
    /// Creates a replica bootstrapped on the genesis certificate of
    /// `ledger`'s root block.
    pub fn new(
        id: impl Into<String>,
        validators: ValidatorSet,
        ledger: SharedLedger,
        transport: Arc<dyn Transport>,
        source: Arc<dyn TransactionSource>,
        signer: Arc<dyn Signer>,
        config: ConsensusConfig,
    ) -> Self {
        let id = id.into();
        let (genesis_hash, committed_height, tip_hash) = {
            let ledger = ledger.read();
            (ledger.genesis().hash, ledger.height(), ledger.latest_block().hash)
        };
        let genesis_qc = QuorumCertificate::genesis(genesis_hash);
        if tip_hash != genesis_hash {
            warn!(node = %id, height = committed_height, "ledger already past genesis");
        }

        info!(
            node = %id,
            validators = validators.len(),
            quorum = validators.quorum_threshold(),
            "consensus engine initialized"
        );

        Self {
            id,
            validators,
            ledger,
            transport,
            source,
            signer,
            persistence: None,
            config,
            genesis_hash,
            state: Mutex::new(ReplicaState {
                current_view: 0,
                high_qc: genesis_qc.clone(),
                high_commit_qc: genesis_qc,
                committed_height: 0,
                pending_blocks: HashMap::new(),
                certificates: HashMap::new(),
                votes: HashMap::new(),
                last_proposed_view: None,
                last_voted_view: None,
                locked_view: 0,
                fault: None,
            }),
            running: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    /// Attaches a commit hook.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.id
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    pub fn current_view(&self) -> u64 {
        self.state.lock().current_view
    }

    pub fn is_primary(&self) -> bool {
        let view = self.current_view();
        self.validators.is_primary(&self.id, view)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cooperative stop. Handlers already running finish their step.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!(node = %self.id, "consensus engine stopping");
        }
    }

    pub fn fault(&self) -> Option<IntegrityFault> {
        self.state.lock().fault.clone()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.state.lock();
        EngineStatus {
            node_id: self.id.clone(),
            current_view: state.current_view,
            high_qc_view: state.high_qc.view,
            high_commit_qc_view: state.high_commit_qc.view,
            locked_view: state.locked_view,
            committed_height: state.committed_height,
            pending_blocks: state.pending_blocks.len(),
            running: self.is_running(),
            fault: state.fault.as_ref().map(ToString::to_string),
        }
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    pub fn high_qc(&self) -> QuorumCertificate {
        self.state.lock().high_qc.clone()
    }

    pub fn high_commit_qc(&self) -> QuorumCertificate {
        self.state.lock().high_commit_qc.clone()
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// External view bump. Moves to `view` if it is ahead of the current
    /// view and returns the resulting view.
    pub fn advance_view(&self, view: u64) -> u64 {
        let mut state = self.state.lock();
        if view > state.current_view {
            self.enter_view(&mut state, view);
        }
        state.current_view
    }

    /// Moves one view forward.
    pub fn bump_view(&self) -> u64 {
        let mut state = self.state.lock();
        let next = state.current_view + 1;
        self.enter_view(&mut state, next);
        next
    }

    fn enter_view(&self, state: &mut ReplicaState, view: u64) {
        state.current_view = view;
        state.votes.retain(|_, tally| tally.view >= view);
        debug!(node = %self.id, view, "entered view");
    }

    // -----------------------------------------------------------------------
    // Proposing
    // -----------------------------------------------------------------------

    /// Proposes a block extending `high_qc` if this replica is the primary
    /// of its current view and has not proposed in it yet.
    ///
    /// Drained transactions that would not apply on top of the parent
    /// branch are left out and reported back to the source. An empty batch
    /// still yields a block.
    pub fn propose_if_leader(&self) -> Option<BlockHash> {
        if !self.is_running() {
            return None;
        }
        let mut effects = Effects::default();
        let proposed = {
            let mut state = self.state.lock();
            if state.fault.is_some() {
                return None;
            }
            let proposed = self.propose_locked(&mut state, &mut effects);
            if let Some(fault) = proposed
                .as_ref()
                .and_then(|(_, result)| result.as_ref().err())
                .and_then(ConsensusError::fault)
            {
                self.halt(&mut state, fault.clone());
            }
            proposed
        };
        let outcome = proposed.and_then(|(hash, result)| match result {
            Ok(()) => Some(hash),
            Err(e) => {
                self.record_drop("propose", &e);
                None
            }
        });
        self.dispatch(effects);
        outcome
    }

    fn propose_locked(
        &self,
        state: &mut ReplicaState,
        effects: &mut Effects,
    ) -> Option<(BlockHash, Result<(), ConsensusError>)> {
        let view = state.current_view;
        if !self.validators.is_primary(&self.id, view) || state.last_proposed_view == Some(view) {
            return None;
        }

        let difficulty = self.config.pow_difficulty;
        if difficulty > MAX_POW_DIFFICULTY {
            state.last_proposed_view = Some(view);
            return Some((
                state.high_qc.block_hash,
                Err(ConsensusError::UnsealableDifficulty {
                    difficulty,
                    max: MAX_POW_DIFFICULTY,
                }),
            ));
        }

        let parent_qc = state.high_qc.clone();
        let (parent, projected, seen) = match self.projection(state, &parent_qc.block_hash) {
            Ok(projection) => projection,
            Err(e) => {
                warn!(node = %self.id, view, error = %e, "cannot extend high certificate");
                return None;
            }
        };

        let mut working = projected;
        let mut included = seen;
        let mut batch = Vec::new();
        {
            let ledger = self.ledger.read();
            for tx in self.source.drain(self.config.max_batch_size) {
                if included.contains(&tx.id) || ledger.find_transaction(&tx.id).is_some() {
                    self.source.reject(&tx, "duplicate transaction id");
                    continue;
                }
                match Ledger::apply(&mut working, &tx) {
                    Ok(()) => {
                        included.insert(tx.id.clone());
                        batch.push(tx);
                    }
                    Err(e) => {
                        debug!(node = %self.id, tx = %tx.id, error = %e, "excluded from proposal");
                        self.source.reject(&tx, &e.to_string());
                    }
                }
            }
        }

        let mut block = Block::new(&parent, batch, parent_qc.clone());
        state.last_proposed_view = Some(view);
        if !block.mine(difficulty, MAX_SEAL_ATTEMPTS) {
            for tx in &block.transactions {
                self.source.reject(tx, "proposal could not be sealed");
            }
            return Some((
                block.hash,
                Err(ConsensusError::SealExhausted {
                    difficulty,
                    attempts: MAX_SEAL_ATTEMPTS,
                }),
            ));
        }
        let hash = block.hash;
        Counters::bump(&self.counters.proposals, 1);

        info!(
            node = %self.id,
            view,
            height = block.index,
            hash = %block.short_hash(),
            txs = block.tx_count(),
            "proposing block"
        );

        effects.outbound.push(ConsensusMessage::Propose(Proposal {
            view,
            block: block.clone(),
            parent_qc,
            sender: self.id.clone(),
        }));
        let result = self.accept_and_vote(state, view, block, effects);
        Some((hash, result))
    }

    // -----------------------------------------------------------------------
    // Message Handling
    // -----------------------------------------------------------------------

    /// Dispatches one message. Every rejection is logged and counted; only
    /// an integrity fault comes back as an error, after which the replica
    /// stays stopped.
    pub fn on_message(&self, message: ConsensusMessage) -> Result<(), IntegrityFault> {
        let kind = message.kind();
        match self.handle(message) {
            Ok(()) => Ok(()),
            Err(e) => match e.fault() {
                Some(fault) => Err(fault.clone()),
                None => {
                    self.record_drop(kind, &e);
                    Ok(())
                }
            },
        }
    }

    /// Validates a proposal and votes for it.
    pub fn on_propose(&self, proposal: Proposal) -> Result<(), ConsensusError> {
        self.handle(ConsensusMessage::Propose(proposal))
    }

    /// Records a vote and certifies its block once a quorum is reached.
    pub fn on_vote(&self, vote: Vote) -> Result<(), ConsensusError> {
        self.handle(ConsensusMessage::Vote(vote))
    }

    fn handle(&self, message: ConsensusMessage) -> Result<(), ConsensusError> {
        let mut effects = Effects::default();
        let result = {
            let mut state = self.state.lock();
            if let Some(fault) = &state.fault {
                return Err(ConsensusError::Integrity(fault.clone()));
            }
            if !self.is_running() {
                return Err(ConsensusError::Stopped);
            }
            let result = match message {
                ConsensusMessage::Propose(p) => self.propose_received(&mut state, p, &mut effects),
                ConsensusMessage::Vote(v) => self.vote_received(&mut state, v, &mut effects),
            };
            if let Some(fault) = result.as_ref().err().and_then(ConsensusError::fault) {
                self.halt(&mut state, fault.clone());
            }
            result
        };
        self.dispatch(effects);
        result
    }

    fn propose_received(
        &self,
        state: &mut ReplicaState,
        proposal: Proposal,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        let Proposal {
            view,
            block,
            parent_qc,
            sender,
        } = proposal;

        if view < state.current_view {
            return Err(ConsensusError::StaleView {
                view,
                current: state.current_view,
            });
        }
        if view > state.current_view {
            // A verified parent certificate may carry this replica forward.
            if self.verify_parent(&block, &parent_qc).is_ok() {
                self.process_certificate(state, parent_qc.clone(), effects)?;
            }
            if view != state.current_view {
                return Err(ConsensusError::StaleView {
                    view,
                    current: state.current_view,
                });
            }
        }
        if !self.validators.is_primary(&sender, view) {
            return Err(ConsensusError::UnauthorizedProposer { sender, view });
        }
        if state.last_voted_view == Some(view) {
            return Err(ConsensusError::DuplicateProposal { view });
        }

        let computed = block.compute_hash();
        if computed != block.hash {
            return Err(ConsensusError::HashMismatch {
                declared: to_hex(&block.hash),
                computed: to_hex(&computed),
            });
        }
        if !block.meets_difficulty(self.config.pow_difficulty) {
            return Err(ConsensusError::InsufficientWork {
                difficulty: self.config.pow_difficulty,
            });
        }

        self.verify_parent(&block, &parent_qc)?;
        let parent_view = parent_qc.view;
        self.process_certificate(state, parent_qc, effects)?;
        if view != state.current_view {
            return Err(ConsensusError::StaleView {
                view,
                current: state.current_view,
            });
        }
        if parent_view < state.locked_view {
            return Err(ConsensusError::BelowLock {
                parent_view,
                locked_view: state.locked_view,
            });
        }

        let (parent, projected, seen) = self.projection(state, &block.previous_hash)?;
        if block.index != parent.index + 1 {
            return Err(LedgerError::IndexGap {
                tip: parent.index,
                found: block.index,
            }
            .into());
        }
        if let Some(tx) = block.transactions.iter().find(|tx| seen.contains(&tx.id)) {
            return Err(LedgerError::DuplicateTransaction {
                tx_id: tx.id.clone(),
            }
            .into());
        }
        self.ledger.read().check_unique(&block.transactions)?;
        Ledger::validate_batch(&projected, &block.transactions)?;

        debug!(
            node = %self.id,
            view,
            height = block.index,
            hash = %block.short_hash(),
            "proposal accepted"
        );
        self.accept_and_vote(state, view, block, effects)
    }

    /// Stores `block` as pending, casts this replica's vote and, if the
    /// block already has a certificate on record, processes it.
    fn accept_and_vote(
        &self,
        state: &mut ReplicaState,
        view: u64,
        block: Block,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        let hash = block.hash;
        if let Some(parent_qc) = &block.parent_qc {
            state.locked_view = state.locked_view.max(parent_qc.view);
        }
        state.pending_blocks.insert(hash, block);
        state.last_voted_view = Some(view);

        let vote = Vote {
            view,
            block_hash: hash,
            sender: self.id.clone(),
            ack: self.signer.sign(&vote_payload(view, &hash)),
        };
        Counters::bump(&self.counters.votes_cast, 1);
        effects.outbound.push(ConsensusMessage::Vote(vote.clone()));
        self.tally(state, vote, effects)?;

        if let Some(qc) = state.certificates.get(&hash).cloned() {
            self.process_certificate(state, qc, effects)?;
        }
        Ok(())
    }

    fn vote_received(
        &self,
        state: &mut ReplicaState,
        vote: Vote,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        if vote.view != state.current_view {
            return Err(ConsensusError::StaleView {
                view: vote.view,
                current: state.current_view,
            });
        }
        if !self.validators.contains(&vote.sender) {
            return Err(ConsensusError::UnknownValidator(vote.sender));
        }
        if self.config.verify_signatures
            && !self.signer.verify(
                &vote.ack,
                &vote_payload(vote.view, &vote.block_hash),
                &vote.sender,
            )
        {
            return Err(ConsensusError::InvalidSignature(vote.sender));
        }
        self.tally(state, vote, effects)
    }

    /// Idempotent per sender. Forms the certificate exactly once.
    fn tally(
        &self,
        state: &mut ReplicaState,
        vote: Vote,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        let threshold = self.validators.quorum_threshold();
        let tally = state.votes.entry(vote.block_hash).or_insert_with(|| VoteTally {
            view: vote.view,
            acks: BTreeMap::new(),
            certified: false,
        });
        if tally.acks.contains_key(&vote.sender) {
            debug!(node = %self.id, from = %vote.sender, "duplicate vote ignored");
            return Ok(());
        }
        tally.acks.insert(vote.sender, vote.ack);
        if tally.certified || tally.acks.len() < threshold {
            return Ok(());
        }
        tally.certified = true;
        let qc = QuorumCertificate::new(tally.view, vote.block_hash, tally.acks.clone());
        Counters::bump(&self.counters.certificates_formed, 1);
        info!(
            node = %self.id,
            view = qc.view,
            hash = %qc.short_hash(),
            acks = qc.signer_count(),
            "quorum certificate formed"
        );
        self.process_certificate(state, qc, effects)
    }

    fn verify_parent(&self, block: &Block, parent_qc: &QuorumCertificate) -> Result<(), ConsensusError> {
        if block.parent_qc.as_ref() != Some(parent_qc) || parent_qc.block_hash != block.previous_hash {
            return Err(ConsensusError::ParentMismatch);
        }
        parent_qc.verify(
            &self.validators,
            self.signer.as_ref(),
            &self.genesis_hash,
            self.config.verify_signatures,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Certificates & Commit
    // -----------------------------------------------------------------------

    /// Records `qc` and, once its block is known, advances the view, raises
    /// `high_qc` and applies the commit rule.
    fn process_certificate(
        &self,
        state: &mut ReplicaState,
        qc: QuorumCertificate,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        let hash = qc.block_hash;
        let qc_view = qc.view;
        let known = state.pending_blocks.contains_key(&hash)
            || hash == state.high_commit_qc.block_hash
            || self.ledger.read().contains_block(&hash);
        if !qc.is_genesis() {
            state.certificates.entry(hash).or_insert_with(|| qc.clone());
        }
        if !known {
            debug!(node = %self.id, hash = %qc.short_hash(), "certificate for unknown block held");
            return Ok(());
        }

        if qc.view >= state.current_view && !qc.is_genesis() {
            self.enter_view(state, qc.view + 1);
            info!(node = %self.id, view = state.current_view, "advanced view on certificate");
        }
        if qc.outranks(&state.high_qc) {
            state.high_qc = qc;
        }
        self.try_commit(state, qc_view, &hash, effects)
    }

    fn try_commit(
        &self,
        state: &mut ReplicaState,
        certified_view: u64,
        certified: &BlockHash,
        effects: &mut Effects,
    ) -> Result<(), ConsensusError> {
        let Some(parent) = state
            .pending_blocks
            .get(certified)
            .and_then(|c| c.parent_qc_hash().copied())
        else {
            return Ok(());
        };
        // Direct chain only: QC(C) must come from the view after QC(P).
        match state.certificates.get(&parent) {
            Some(parent_qc) if parent_qc.view + 1 == certified_view => {}
            _ => return Ok(()),
        }

        // Walk from the parent back to the last committed block. Every link
        // must be pending and certified.
        let mut chain = Vec::new();
        let mut cursor = parent;
        while cursor != state.high_commit_qc.block_hash {
            let Some(block) = state.pending_blocks.get(&cursor) else {
                return Ok(());
            };
            if !state.certificates.contains_key(&cursor) {
                return Ok(());
            }
            chain.push(cursor);
            cursor = match block.parent_qc_hash() {
                Some(hash) => *hash,
                None => return Ok(()),
            };
        }

        for hash in chain.into_iter().rev() {
            if !self.commit(state, hash, effects)? {
                break;
            }
        }
        Ok(())
    }

    /// Appends one certified block. Returns whether `high_commit_qc` moved.
    fn commit(
        &self,
        state: &mut ReplicaState,
        hash: BlockHash,
        effects: &mut Effects,
    ) -> Result<bool, ConsensusError> {
        let (Some(block), Some(qc)) = (
            state.pending_blocks.get(&hash).cloned(),
            state.certificates.get(&hash).cloned(),
        ) else {
            return Ok(false);
        };

        let outcome = {
            let mut ledger = self.ledger.write();
            match ledger.add_block(block.clone()) {
                Ok(()) => Ok(true),
                // Another replica sharing this ledger got there first.
                Err(e) if e.is_chain_link() && ledger.contains_block(&hash) => Ok(false),
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(appended) => {
                if appended {
                    info!(
                        node = %self.id,
                        height = block.index,
                        hash = %block.short_hash(),
                        txs = block.tx_count(),
                        "block committed"
                    );
                } else {
                    debug!(node = %self.id, height = block.index, "block already in shared ledger");
                }
                Counters::bump(&self.counters.blocks_committed, 1);
                Counters::bump(&self.counters.transactions_committed, block.tx_count() as u64);
                let height = block.index;
                state.high_commit_qc = qc;
                state.committed_height = height;
                self.collect_garbage(state, height);
                effects.committed.push(block);
                Ok(true)
            }
            Err(LedgerError::Integrity(fault)) => Err(ConsensusError::Integrity(fault)),
            Err(e) => {
                error!(
                    node = %self.id,
                    height = block.index,
                    hash = %block.short_hash(),
                    error = %e,
                    "ledger refused certified block"
                );
                Ok(false)
            }
        }
    }

    fn collect_garbage(&self, state: &mut ReplicaState, committed_height: u64) {
        let before = state.pending_blocks.len();
        state
            .pending_blocks
            .retain(|_, block| block.index > committed_height);
        let committed_view = state.high_commit_qc.view;
        let pending = &state.pending_blocks;
        state
            .certificates
            .retain(|hash, qc| pending.contains_key(hash) || qc.view > committed_view);
        let dropped = before - state.pending_blocks.len();
        if dropped > 1 {
            debug!(node = %self.id, dropped, "pruned pending blocks");
        }
    }

    // -----------------------------------------------------------------------
    // Projection
    // -----------------------------------------------------------------------

    /// Resolves `parent` and the balances and transaction ids that hold
    /// once every uncommitted ancestor up to it is applied on top of the
    /// committed ledger.
    fn projection(
        &self,
        state: &ReplicaState,
        parent: &BlockHash,
    ) -> Result<(Block, Balances, HashSet<String>), ConsensusError> {
        let ledger = self.ledger.read();
        let tip = ledger.latest_block().hash;

        let mut ancestors = Vec::new();
        let mut cursor = *parent;
        while cursor != tip {
            if let Some(block) = ledger.block_by_hash(&cursor) {
                return Err(ConsensusError::ConflictsWithCommitted {
                    height: block.index,
                });
            }
            let Some(block) = state.pending_blocks.get(&cursor) else {
                return Err(ConsensusError::UnknownParent(short_hex(&cursor)));
            };
            ancestors.push(block);
            cursor = block.previous_hash;
        }

        let parent_block = match ancestors.first() {
            Some(block) => (*block).clone(),
            None => ledger.latest_block().clone(),
        };

        let mut balances = ledger.balances().clone();
        let mut seen = HashSet::new();
        for block in ancestors.iter().rev() {
            ledger.check_unique(&block.transactions)?;
            balances = Ledger::validate_batch(&balances, &block.transactions)?;
            seen.extend(block.transactions.iter().map(|tx| tx.id.clone()));
        }
        Ok((parent_block, balances, seen))
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    /// Full audit of the ledger. A failure halts this replica.
    pub fn audit(&self) -> Result<(), IntegrityFault> {
        let result = self.ledger.read().audit();
        if let Err(fault) = &result {
            self.halt(&mut self.state.lock(), fault.clone());
        }
        result
    }

    fn halt(&self, state: &mut ReplicaState, fault: IntegrityFault) {
        error!(node = %self.id, %fault, "integrity fault, halting replica");
        state.fault = Some(fault);
        self.running.store(false, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn record_drop(&self, kind: &str, error: &ConsensusError) {
        Counters::bump(&self.counters.messages_dropped, 1);
        if error.is_benign() {
            debug!(node = %self.id, kind, reason = %error, "message dropped");
        } else {
            warn!(node = %self.id, kind, reason = %error, "message dropped");
        }
    }

    fn dispatch(&self, effects: Effects) {
        for message in effects.outbound {
            if let Err(e) = self.transport.broadcast(&message, true) {
                warn!(node = %self.id, kind = message.kind(), error = %e, "broadcast failed");
            }
        }
        if let Some(persistence) = &self.persistence {
            for block in &effects.committed {
                persistence.on_block_committed(&self.id, block);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::signer::MockSigner;
    use crate::institution::TransactionPool;
    use crate::network::{SimulatedNetwork, SimulationOptions};
    use crate::transaction::TransactionBuilder;

    fn solo() -> (ConsensusEngine, Arc<TransactionPool>) {
        solo_with(ConsensusConfig::default())
    }

    fn solo_with(config: ConsensusConfig) -> (ConsensusEngine, Arc<TransactionPool>) {
        let network = Arc::new(SimulatedNetwork::new(["FO_001"], SimulationOptions::default()));
        let pool = Arc::new(TransactionPool::default());
        let ledger = Ledger::shared();
        ledger.write().mint("A", 1_000).unwrap();
        let engine = ConsensusEngine::new(
            "FO_001",
            ValidatorSet::from_ids(["FO_001"]),
            ledger,
            network,
            pool.clone(),
            Arc::new(MockSigner::new("FO_001")),
            config,
        );
        (engine, pool)
    }

    #[test]
    fn unreachable_difficulty_fails_fast_and_keeps_pool() {
        let (engine, pool) = solo_with(ConsensusConfig {
            pow_difficulty: 64,
            ..ConsensusConfig::default()
        });
        pool.submit(TransactionBuilder::transfer("A", "B", 300).timestamp(1).build())
            .unwrap();

        assert!(engine.propose_if_leader().is_none());
        assert!(engine.propose_if_leader().is_none());

        let status = engine.status();
        assert_eq!(status.current_view, 0);
        assert_eq!(status.pending_blocks, 0);
        assert!(status.running);
        assert_eq!(pool.size(), 1);
        assert_eq!(engine.stats().proposals, 0);
        assert_eq!(engine.stats().messages_dropped, 1);
    }

    #[test]
    fn sealed_solo_chain_commits() {
        let (engine, _pool) = solo_with(ConsensusConfig {
            pow_difficulty: 2,
            ..ConsensusConfig::default()
        });
        for _ in 0..3 {
            assert!(engine.propose_if_leader().is_some());
        }
        let ledger = engine.ledger().read();
        assert_eq!(ledger.height(), 2);
        assert!(ledger.block_at(1).unwrap().meets_difficulty(2));
        assert!(ledger.block_at(2).unwrap().meets_difficulty(2));
    }

    #[test]
    fn solo_replica_commits_parent_of_each_new_certificate() {
        let (engine, pool) = solo();
        pool.submit(TransactionBuilder::transfer("A", "B", 300).timestamp(1).build())
            .unwrap();

        assert!(engine.propose_if_leader().is_some());
        assert_eq!(engine.ledger().read().height(), 0);
        assert!(engine.propose_if_leader().is_some());
        assert!(engine.propose_if_leader().is_some());

        let status = engine.status();
        assert_eq!(status.current_view, 3);
        assert_eq!(status.high_qc_view, 2);
        assert_eq!(status.high_commit_qc_view, 1);
        assert_eq!(status.committed_height, 2);
        assert_eq!(status.locked_view, 1);
        assert_eq!(status.pending_blocks, 1);
        assert!(status.running);

        let ledger = engine.ledger().read();
        assert_eq!(ledger.balance("A"), 700);
        assert_eq!(ledger.balance("B"), 300);
        let stats = engine.stats();
        assert_eq!(stats.proposals, 3);
        assert_eq!(stats.certificates_formed, 3);
        assert_eq!(stats.blocks_committed, 2);
        assert_eq!(stats.transactions_committed, 1);
    }

    #[test]
    fn proposes_once_per_view() {
        let (engine, _pool) = solo();
        engine.propose_if_leader();
        let view = engine.current_view();
        engine.advance_view(view);
        assert_eq!(engine.current_view(), view);
        assert_eq!(engine.stats().proposals, 1);
    }

    #[test]
    fn leader_leaves_out_overdrafts_and_reports_them() {
        let (engine, pool) = solo();
        pool.submit(TransactionBuilder::transfer("A", "B", 900).timestamp(1).build())
            .unwrap();
        pool.submit(TransactionBuilder::transfer("A", "C", 200).timestamp(2).build())
            .unwrap();
        engine.propose_if_leader();
        assert_eq!(pool.rejected_count(), 1);
        assert_eq!(pool.rejected()[0].transaction.recipient, "C");
    }

    #[test]
    fn corrupted_ledger_halts_replica() {
        let (engine, _pool) = solo();
        engine.propose_if_leader();
        engine.propose_if_leader();
        assert_eq!(engine.ledger().read().height(), 1);

        engine
            .ledger()
            .write()
            .tamper_block(1, |block| block.nonce = 42);
        engine.propose_if_leader();

        let fault = engine.fault().expect("replica should be halted");
        assert_eq!(fault.height, 1);
        assert!(!engine.is_running());
        assert!(engine.status().fault.is_some());
        assert!(engine.propose_if_leader().is_none());

        let vote = Vote {
            view: engine.current_view(),
            block_hash: [0u8; 32],
            sender: "FO_001".into(),
            ack: String::new(),
        };
        assert_eq!(engine.on_message(vote.into()), Err(fault));
    }

    #[test]
    fn audit_failure_halts_replica() {
        let (engine, _pool) = solo();
        assert!(engine.audit().is_ok());
        engine
            .ledger()
            .write()
            .tamper_block(0, |genesis| genesis.timestamp = 1);
        assert!(engine.audit().is_err());
        assert!(!engine.is_running());
    }

    #[test]
    fn stopped_replica_drops_messages() {
        let (engine, _pool) = solo();
        engine.stop();
        let vote = Vote {
            view: 0,
            block_hash: [0u8; 32],
            sender: "FO_001".into(),
            ack: String::new(),
        };
        assert_eq!(engine.on_vote(vote.clone()), Err(ConsensusError::Stopped));
        assert_eq!(engine.on_message(vote.into()), Ok(()));
        assert_eq!(engine.stats().messages_dropped, 1);
    }
}

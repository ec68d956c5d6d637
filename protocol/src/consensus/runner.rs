//! # Replica Run Loop
//!
//! One [`ReplicaRunner`] per replica, each on its own tokio task. The loop
//! multiplexes three event sources:
//!
//! 1. Frames arriving in the replica's mailbox, handed to
//!    [`ConsensusEngine::on_message`].
//! 2. The proposal cadence, which calls
//!    [`ConsensusEngine::propose_if_leader`].
//! 3. The shutdown channel owned by a [`Controller`].
//!
//! ## Shutdown
//!
//! The loop checks the shutdown flag and the engine's running flag before
//! every event. A step in progress always finishes; nothing is interrupted
//! mid-handler. An integrity fault ends the loop with an error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::engine::ConsensusEngine;
use crate::ledger::IntegrityFault;
use crate::network::channel::Mailbox;

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns the stop signal observed by every runner of a cluster.
#[derive(Debug)]
pub struct Controller {
    tx: watch::Sender<bool>,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Requests shutdown. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

// ---------------------------------------------------------------------------
// Exit & Error Types
// ---------------------------------------------------------------------------

/// Why a runner returned cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// The controller asked for shutdown.
    Shutdown,
    /// The engine was stopped directly.
    Stopped,
    /// The mailbox closed: the replica was removed from the network.
    Disconnected,
}

/// Errors that end a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The replica's ledger failed an integrity check.
    Integrity(IntegrityFault),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integrity(fault) => write!(f, "replica halted: {}", fault),
        }
    }
}

impl std::error::Error for RunnerError {}

impl From<IntegrityFault> for RunnerError {
    fn from(fault: IntegrityFault) -> Self {
        Self::Integrity(fault)
    }
}

// ---------------------------------------------------------------------------
// ReplicaRunner
// ---------------------------------------------------------------------------

pub struct ReplicaRunner {
    engine: Arc<ConsensusEngine>,
    mailbox: Mailbox,
    propose_interval: Duration,
}

impl ReplicaRunner {
    pub fn new(engine: Arc<ConsensusEngine>, mailbox: Mailbox) -> Self {
        let propose_interval = engine.config().propose_interval();
        Self {
            engine,
            mailbox,
            propose_interval,
        }
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    /// Runs until shutdown, disconnection, a direct stop or an integrity
    /// fault.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunnerExit, RunnerError> {
        let node = self.engine.node_id().to_string();
        info!(node = %node, interval_ms = self.propose_interval.as_millis() as u64, "replica runner starting");

        let mut ticker = tokio::time::interval(self.propose_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                info!(node = %node, "shutdown signal received, exiting cleanly");
                self.engine.stop();
                return Ok(RunnerExit::Shutdown);
            }
            if !self.engine.is_running() {
                return match self.engine.fault() {
                    Some(fault) => Err(RunnerError::Integrity(fault)),
                    None => Ok(RunnerExit::Stopped),
                };
            }

            tokio::select! {
                frame = self.mailbox.recv() => match frame {
                    Some(Ok(message)) => self.engine.on_message(message)?,
                    Some(Err(e)) => warn!(node = %node, error = %e, "undecodable frame dropped"),
                    None => {
                        info!(node = %node, "mailbox closed, replica disconnected");
                        self.engine.stop();
                        return Ok(RunnerExit::Disconnected);
                    }
                },
                _ = ticker.tick() => {
                    if let Some(hash) = self.engine.propose_if_leader() {
                        debug!(node = %node, hash = %crate::crypto::hash::short_hex(&hash), "proposal sent");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Controller dropped: nobody can ask us to stop any more.
                        self.engine.stop();
                        return Ok(RunnerExit::Shutdown);
                    }
                }
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
    use crate::config::ConsensusConfig;
    use crate::consensus::signer::MockSigner;
    use crate::consensus::validator_set::ValidatorSet;
    use crate::institution::TransactionPool;
    use crate::ledger::Ledger;
    use crate::network::ChannelNetwork;
    use crate::transaction::TransactionBuilder;

    struct Solo {
        engine: Arc<ConsensusEngine>,
        pool: Arc<TransactionPool>,
        network: Arc<ChannelNetwork>,
        mailbox: Mailbox,
    }

    fn solo() -> Solo {
        let network = Arc::new(ChannelNetwork::new());
        let mailbox = network.register("FO_001");
        let pool = Arc::new(TransactionPool::default());
        let ledger = Ledger::shared();
        ledger.write().mint("A", 1_000).unwrap();
        let engine = Arc::new(ConsensusEngine::new(
            "FO_001",
            ValidatorSet::from_ids(["FO_001"]),
            ledger,
            network.clone(),
            pool.clone(),
            Arc::new(MockSigner::new("FO_001")),
            ConsensusConfig {
                propose_interval_ms: 100,
                ..ConsensusConfig::default()
            },
        ));
        Solo {
            engine,
            pool,
            network,
            mailbox,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runner_commits_and_shuts_down() {
        let s = solo();
        s.pool
            .submit(
                TransactionBuilder::transfer("A", "B", 300)
                    .timestamp(1)
                    .build(),
            )
            .unwrap();

        let controller = Controller::new();
        let runner = ReplicaRunner::new(s.engine.clone(), s.mailbox);
        let handle = tokio::spawn(runner.run(controller.subscribe()));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        controller.stop();
        let exit = handle.await.unwrap();

        assert_eq!(exit, Ok(RunnerExit::Shutdown));
        assert!(!s.engine.is_running());
        let ledger = s.engine.ledger().read();
        assert!(ledger.height() >= 2);
        assert_eq!(ledger.balance("A"), 700);
        assert_eq!(ledger.balance("B"), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn runner_exits_when_disconnected() {
        let s = solo();
        let controller = Controller::new();
        let handle = tokio::spawn(ReplicaRunner::new(s.engine.clone(), s.mailbox).run(controller.subscribe()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        s.network.disconnect("FO_001");
        assert_eq!(handle.await.unwrap(), Ok(RunnerExit::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn direct_stop_ends_runner() {
        let s = solo();
        let controller = Controller::new();
        let handle = tokio::spawn(ReplicaRunner::new(s.engine.clone(), s.mailbox).run(controller.subscribe()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        s.engine.stop();
        // The next tick observes the flag.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.await.unwrap(), Ok(RunnerExit::Stopped));
        assert!(!controller.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn integrity_fault_surfaces_as_error() {
        let s = solo();
        s.engine
            .ledger()
            .write()
            .tamper_block(0, |genesis| genesis.nonce = 99);

        let controller = Controller::new();
        let handle = tokio::spawn(ReplicaRunner::new(s.engine.clone(), s.mailbox).run(controller.subscribe()));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RunnerError::Integrity(ref f)) if f.height == 0));
        assert!(s.engine.status().fault.is_some());
    }
}

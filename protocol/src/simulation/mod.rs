//! # Simulation Harness
//!
//! Drives an in-process cluster with a synthetic transfer workload and
//! reports what the replicas agreed on.
//!
//! ```text
//! scenario.rs — load presets and participant naming
//! workload.rs — seeded per-institution transfer generator
//! cluster.rs  — replicas, runners and cluster-wide operations
//! ```

pub mod cluster;
pub mod scenario;
pub mod workload;

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

pub use cluster::{Cluster, LedgerMode, Replica, SignerKind, SimulationConfig};
pub use scenario::Scenario;
pub use workload::WorkloadGenerator;

use crate::consensus::RunnerExit;
use crate::institution::PoolError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("a cluster needs at least one validator")]
    NoValidators,

    #[error("{accounts} accounts cannot give {institutions} institutions two accounts each")]
    TooFewAccounts { accounts: usize, institutions: usize },

    #[error("sealing difficulty {difficulty} exceeds the maximum of {max}")]
    DifficultyTooHigh { difficulty: u32, max: u32 },

    #[error("no institution serves account {0}")]
    UnknownAccount(String),

    #[error("transfer refused: {0}")]
    Pool(#[from] PoolError),

    #[error("ledger setup failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Per-replica outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaReport {
    pub node: String,
    pub height: u64,
    pub view: u64,
    pub committed_transactions: u64,
    pub messages_dropped: u64,
    /// How the runner ended.
    pub exit: String,
    /// Audit failure, if any.
    pub fault: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub scenario: Scenario,
    pub validators: usize,
    pub accounts: usize,
    pub ledger_mode: LedgerMode,
    pub signer: SignerKind,
    pub submitted: u64,
    pub refused: u64,
    /// Drained transfers the leaders excluded from their blocks.
    pub rejected: usize,
    /// Height every replica reached.
    pub common_height: u64,
    pub prefix_agreement: bool,
    pub audits_passed: bool,
    /// Transactions committed by the slowest replica.
    pub committed_transactions: u64,
    pub elapsed_ms: u64,
    pub throughput_tps: f64,
    pub replicas: Vec<ReplicaReport>,
}

impl SimulationReport {
    /// Safety held: replicas agree and every ledger passed its audit.
    pub fn is_consistent(&self) -> bool {
        self.prefix_agreement && self.audits_passed
    }
}

/// Builds a cluster, feeds it the configured workload, lets it settle,
/// stops it and audits every ledger.
pub async fn run_simulation(config: SimulationConfig) -> Result<SimulationReport, SimulationError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let clock = Instant::now();
    info!(%run_id, scenario = %config.scenario, "simulation starting");

    let cluster = Cluster::build(&config, None)?;
    cluster.start();

    let mut generator = WorkloadGenerator::new(config.seed, cluster.accounts(), config.initial_balance);
    let submitted = cluster
        .run_workload(
            &mut generator,
            config.workload_tick(),
            config.target(),
            config.duration(),
        )
        .await;
    cluster
        .settle(config.settle(), config.consensus.propose_interval())
        .await;

    cluster.stop();
    let exits = cluster.join().await;
    let audits = cluster.audit();
    let (prefix_agreement, common_height) = cluster.prefix_agreement();

    let replicas: Vec<ReplicaReport> = cluster
        .replicas()
        .iter()
        .map(|replica| {
            let id = replica.engine.node_id();
            let status = replica.engine.status();
            let stats = replica.engine.stats();
            let exit = match exits.iter().find(|(node, _)| node == id) {
                Some((_, Ok(RunnerExit::Shutdown))) => "shutdown".to_string(),
                Some((_, Ok(RunnerExit::Stopped))) => "stopped".to_string(),
                Some((_, Ok(RunnerExit::Disconnected))) => "disconnected".to_string(),
                Some((_, Err(e))) => e.to_string(),
                None => "not started".to_string(),
            };
            let fault = audits
                .iter()
                .find(|(node, _)| node == id)
                .and_then(|(_, r)| r.as_ref().err())
                .map(ToString::to_string);
            ReplicaReport {
                node: id.to_string(),
                height: replica.engine.ledger().read().height(),
                view: status.current_view,
                committed_transactions: stats.transactions_committed,
                messages_dropped: stats.messages_dropped,
                exit,
                fault,
            }
        })
        .collect();

    let audits_passed = audits.iter().all(|(_, r)| r.is_ok());
    let committed_transactions = replicas
        .iter()
        .map(|r| r.committed_transactions)
        .min()
        .unwrap_or(0);
    let rejected = cluster
        .institutions()
        .iter()
        .map(|i| i.pool().rejected_count())
        .sum();
    let elapsed_ms = clock.elapsed().as_millis() as u64;
    let throughput_tps = if elapsed_ms == 0 {
        0.0
    } else {
        committed_transactions as f64 * 1_000.0 / elapsed_ms as f64
    };

    if !prefix_agreement {
        error!(%run_id, common_height, "replicas diverged on the committed prefix");
    }
    info!(
        %run_id,
        submitted,
        committed = committed_transactions,
        common_height,
        elapsed_ms,
        "simulation finished"
    );

    Ok(SimulationReport {
        run_id,
        started_at,
        scenario: config.scenario,
        validators: config.validator_count(),
        accounts: cluster.accounts().len(),
        ledger_mode: config.ledger_mode,
        signer: config.signer,
        submitted,
        refused: generator.refused(),
        rejected,
        common_height,
        prefix_agreement,
        audits_passed,
        committed_transactions,
        elapsed_ms,
        throughput_tps,
        replicas,
    })
}

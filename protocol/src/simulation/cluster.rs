//! # In-Process Validator Cluster
//!
//! A [`Cluster`] wires one [`ConsensusEngine`] per institution onto a shared
//! [`ChannelNetwork`] and runs each behind its own [`ReplicaRunner`] task.
//!
//! ```text
//!   FinancialInstitution ── pool ──▶ ConsensusEngine ◀── Mailbox ◀─┐
//!          (FO_001)                        │                       │
//!                                          └── broadcast ──▶ ChannelNetwork
//! ```
//!
//! Initial balances are issued before any replica starts. In per-replica
//! mode the same mint transactions are replayed into every ledger, so all
//! replicas begin from an identical state.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::scenario::{assign_accounts, institution_id, Scenario};
use super::workload::WorkloadGenerator;
use super::SimulationError;
use crate::config::{ConsensusConfig, DEFAULT_INITIAL_BALANCE, MAX_POW_DIFFICULTY};
use crate::consensus::{
    ConsensusEngine, Controller, Ed25519Signer, EngineStatus, MockSigner, ReplicaRunner,
    RunnerError, RunnerExit, Signer, ValidatorSet,
};
use crate::institution::{FinancialInstitution, PoolConfig};
use crate::ledger::{Block, CommitJournal, IntegrityFault, Ledger, Persistence, SharedLedger};
use crate::network::ChannelNetwork;
use crate::transaction::{Transaction, TransactionBuilder, TransactionType};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Whether replicas keep their own ledger or append to one shared instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerMode {
    #[default]
    PerReplica,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SignerKind {
    #[default]
    Mock,
    Ed25519,
}

/// Everything needed to build and drive a cluster. Unset overrides fall
/// back to the scenario preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub scenario: Scenario,
    pub validators: Option<usize>,
    pub accounts: Option<usize>,
    pub initial_balance: u64,
    pub target_transactions: Option<u64>,
    /// Wall-clock budget for the workload phase.
    pub duration_ms: u64,
    /// Time allowed after the workload for pools to drain and commit.
    pub settle_ms: u64,
    pub workload_tick_ms: u64,
    pub seed: u64,
    pub ledger_mode: LedgerMode,
    pub signer: SignerKind,
    pub consensus: ConsensusConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::Low,
            validators: None,
            accounts: None,
            initial_balance: DEFAULT_INITIAL_BALANCE,
            target_transactions: None,
            duration_ms: 10_000,
            settle_ms: 5_000,
            workload_tick_ms: 100,
            seed: 7,
            ledger_mode: LedgerMode::PerReplica,
            signer: SignerKind::Mock,
            consensus: ConsensusConfig {
                propose_interval_ms: 100,
                ..ConsensusConfig::default()
            },
        }
    }
}

impl SimulationConfig {
    pub fn validator_count(&self) -> usize {
        self.validators.unwrap_or_else(|| self.scenario.institutions())
    }

    pub fn account_count(&self) -> usize {
        self.accounts.unwrap_or_else(|| self.scenario.accounts())
    }

    pub fn target(&self) -> u64 {
        self.target_transactions
            .unwrap_or_else(|| self.scenario.target_transactions())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn workload_tick(&self) -> Duration {
        Duration::from_millis(self.workload_tick_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// One institution and the replica it operates.
#[derive(Clone)]
pub struct Replica {
    pub engine: Arc<ConsensusEngine>,
    pub institution: Arc<FinancialInstitution>,
}

type RunnerHandle = JoinHandle<Result<RunnerExit, RunnerError>>;

/// Forwards commits to the cluster journal and an optional extra hook.
struct ClusterHooks {
    journal: Arc<CommitJournal>,
    extra: Option<Arc<dyn Persistence>>,
}

impl Persistence for ClusterHooks {
    fn on_block_committed(&self, node: &str, block: &Block) {
        self.journal.on_block_committed(node, block);
        if let Some(extra) = &self.extra {
            extra.on_block_committed(node, block);
        }
    }
}

pub struct Cluster {
    network: Arc<ChannelNetwork>,
    replicas: Vec<Replica>,
    accounts: Vec<String>,
    controller: Controller,
    journal: Arc<CommitJournal>,
    mailboxes: Mutex<Vec<crate::network::Mailbox>>,
    handles: Mutex<Vec<(String, RunnerHandle)>>,
}

impl Cluster {
    /// Builds the replicas and issues initial balances. Nothing runs until
    /// [`Cluster::start`].
    pub fn build(
        config: &SimulationConfig,
        hook: Option<Arc<dyn Persistence>>,
    ) -> Result<Self, SimulationError> {
        let n = config.validator_count();
        if n == 0 {
            return Err(SimulationError::NoValidators);
        }
        let difficulty = config.consensus.pow_difficulty;
        if difficulty > MAX_POW_DIFFICULTY {
            return Err(SimulationError::DifficultyTooHigh {
                difficulty,
                max: MAX_POW_DIFFICULTY,
            });
        }
        let account_count = config.account_count();
        if account_count < 2 * n {
            return Err(SimulationError::TooFewAccounts {
                accounts: account_count,
                institutions: n,
            });
        }

        let ids: Vec<String> = (0..n).map(institution_id).collect();
        let rosters = assign_accounts(account_count, n);
        let accounts: Vec<String> = rosters.iter().flatten().cloned().collect();
        let validators = ValidatorSet::from_ids(ids.iter().cloned());
        if n < crate::config::MIN_BFT_VALIDATORS {
            warn!(validators = n, "cluster cannot tolerate a Byzantine validator");
        }

        let mints: Vec<Transaction> = accounts
            .iter()
            .map(|a| {
                TransactionBuilder::mint(a, config.initial_balance)
                    .timestamp(0)
                    .build()
            })
            .collect();
        let shared = match config.ledger_mode {
            LedgerMode::Shared => Some(seeded_ledger(&mints)?),
            LedgerMode::PerReplica => None,
        };

        let signers: Vec<Arc<dyn Signer>> = match config.signer {
            SignerKind::Mock => ids
                .iter()
                .map(|id| Arc::new(MockSigner::new(id.clone())) as Arc<dyn Signer>)
                .collect(),
            SignerKind::Ed25519 => Ed25519Signer::generate_cluster(ids.iter().cloned())
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn Signer>)
                .collect(),
        };

        let network = Arc::new(ChannelNetwork::new());
        let journal = Arc::new(CommitJournal::new());
        let hooks: Arc<dyn Persistence> = Arc::new(ClusterHooks {
            journal: journal.clone(),
            extra: hook,
        });

        let mut replicas = Vec::with_capacity(n);
        let mut mailboxes = Vec::with_capacity(n);
        for ((id, roster), signer) in ids.iter().zip(rosters).zip(signers) {
            let ledger = match &shared {
                Some(ledger) => ledger.clone(),
                None => seeded_ledger(&mints)?,
            };
            let institution = Arc::new(FinancialInstitution::new(
                id.clone(),
                roster,
                PoolConfig::default(),
            ));
            mailboxes.push(network.register(id.clone()));
            let engine = ConsensusEngine::new(
                id.clone(),
                validators.clone(),
                ledger,
                network.clone(),
                institution.source(),
                signer,
                config.consensus.clone(),
            )
            .with_persistence(hooks.clone());
            replicas.push(Replica {
                engine: Arc::new(engine),
                institution,
            });
        }

        info!(
            validators = n,
            accounts = accounts.len(),
            mode = ?config.ledger_mode,
            signer = ?config.signer,
            "cluster built"
        );

        Ok(Self {
            network,
            replicas,
            accounts,
            controller: Controller::new(),
            journal,
            mailboxes: Mutex::new(mailboxes),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawns one runner task per replica. Must be called inside a tokio
    /// runtime. A second call is a no-op.
    pub fn start(&self) {
        let mailboxes = std::mem::take(&mut *self.mailboxes.lock());
        let mut handles = self.handles.lock();
        for mailbox in mailboxes {
            let Some(replica) = self.replica(mailbox.node()) else {
                continue;
            };
            let id = replica.engine.node_id().to_string();
            let runner = ReplicaRunner::new(replica.engine.clone(), mailbox);
            handles.push((id, tokio::spawn(runner.run(self.controller.subscribe()))));
        }
    }

    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }

    pub fn replica(&self, id: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.engine.node_id() == id)
    }

    pub fn engines(&self) -> Vec<Arc<ConsensusEngine>> {
        self.replicas.iter().map(|r| r.engine.clone()).collect()
    }

    pub fn institutions(&self) -> Vec<Arc<FinancialInstitution>> {
        self.replicas.iter().map(|r| r.institution.clone()).collect()
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn network(&self) -> &Arc<ChannelNetwork> {
        &self.network
    }

    pub fn journal(&self) -> &Arc<CommitJournal> {
        &self.journal
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn status(&self) -> Vec<EngineStatus> {
        self.replicas.iter().map(|r| r.engine.status()).collect()
    }

    /// Moves every replica one view forward. Returns the new views.
    pub fn bump_view(&self) -> Vec<u64> {
        self.replicas.iter().map(|r| r.engine.bump_view()).collect()
    }

    /// Audits every replica's ledger. A failing replica halts.
    pub fn audit(&self) -> Vec<(String, Result<(), IntegrityFault>)> {
        self.replicas
            .iter()
            .map(|r| (r.engine.node_id().to_string(), r.engine.audit()))
            .collect()
    }

    /// Pools a transfer at the institution that serves `sender`.
    pub fn submit_transfer(
        &self,
        sender: &str,
        recipient: &str,
        amount: u64,
        kind: TransactionType,
    ) -> Result<Transaction, SimulationError> {
        let replica = self
            .replicas
            .iter()
            .find(|r| r.institution.serves(sender))
            .ok_or_else(|| SimulationError::UnknownAccount(sender.to_string()))?;
        Ok(replica
            .institution
            .submit_transfer(sender, recipient, amount, kind)?)
    }

    /// Total transfers still waiting in institution pools.
    pub fn pool_depth(&self) -> usize {
        self.replicas.iter().map(|r| r.institution.pool().size()).sum()
    }

    /// Whether every pair of replicas agrees on their common committed
    /// prefix. Returns the common height alongside.
    pub fn prefix_agreement(&self) -> (bool, u64) {
        let ledgers: Vec<SharedLedger> = self
            .replicas
            .iter()
            .map(|r| r.engine.ledger().clone())
            .collect();
        let common = ledgers.iter().map(|l| l.read().height()).min().unwrap_or(0);
        let Some(first) = ledgers.first() else {
            return (true, 0);
        };
        let reference: Vec<_> = {
            let ledger = first.read();
            (0..=common)
                .filter_map(|h| ledger.block_at(h).map(|b| b.hash))
                .collect()
        };
        let agrees = ledgers.iter().skip(1).all(|l| {
            let ledger = l.read();
            (0..=common)
                .filter_map(|h| ledger.block_at(h).map(|b| b.hash))
                .eq(reference.iter().copied())
        });
        (agrees, common)
    }

    /// Feeds the workload into the pools until `target` transfers were
    /// accepted, `duration` elapses or the cluster is stopped.
    pub async fn run_workload(
        &self,
        generator: &mut WorkloadGenerator,
        tick: Duration,
        target: u64,
        duration: Duration,
    ) -> u64 {
        let institutions = self.institutions();
        let mut shutdown = self.controller.subscribe();
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while generator.submitted() < target && !self.controller.is_stopped() {
            tokio::select! {
                _ = ticker.tick() => {
                    generator.tick(&institutions);
                }
                _ = &mut deadline => break,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        generator.submitted()
    }

    /// Waits until every pool is empty and the replicas have had a few more
    /// rounds to commit, or until `budget` elapses.
    pub async fn settle(&self, budget: Duration, propose_interval: Duration) {
        let poll = propose_interval.max(Duration::from_millis(10));
        let drained = async {
            while self.pool_depth() > 0 {
                tokio::time::sleep(poll).await;
            }
            // Two more certified rounds carry the last batch through the
            // commit rule.
            tokio::time::sleep(poll * 4).await;
        };
        if tokio::time::timeout(budget, drained).await.is_err() {
            warn!(pool_depth = self.pool_depth(), "settle budget exhausted");
        }
    }

    /// Signals every runner to stop.
    pub fn stop(&self) {
        self.controller.stop();
    }

    /// Waits for every runner task and returns how each one ended.
    pub async fn join(&self) -> Vec<(String, Result<RunnerExit, RunnerError>)> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let (ids, tasks): (Vec<String>, Vec<RunnerHandle>) = handles.into_iter().unzip();
        let results = futures::future::join_all(tasks).await;
        ids.into_iter()
            .zip(results)
            .map(|(id, result)| {
                let exit = result.unwrap_or_else(|e| {
                    warn!(node = %id, error = %e, "runner task failed");
                    Ok(RunnerExit::Stopped)
                });
                (id, exit)
            })
            .collect()
    }
}

fn seeded_ledger(mints: &[Transaction]) -> Result<SharedLedger, SimulationError> {
    let ledger = Ledger::shared();
    {
        let mut guard = ledger.write();
        for tx in mints {
            guard.issue(tx.clone())?;
        }
    }
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(mode: LedgerMode) -> SimulationConfig {
        SimulationConfig {
            validators: Some(4),
            accounts: Some(16),
            initial_balance: 1_000,
            ledger_mode: mode,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn build_seeds_every_replica_identically() {
        let cluster = Cluster::build(&small(LedgerMode::PerReplica), None).unwrap();
        assert_eq!(cluster.replicas().len(), 4);
        assert_eq!(cluster.accounts().len(), 16);
        for replica in cluster.replicas() {
            let ledger = replica.engine.ledger().read();
            assert_eq!(ledger.total_supply(), 16_000);
            assert_eq!(ledger.balance("USER_000001"), 1_000);
            assert_eq!(replica.institution.accounts().len(), 4);
        }
        let (agrees, common) = cluster.prefix_agreement();
        assert!(agrees);
        assert_eq!(common, 0);
    }

    #[test]
    fn shared_mode_uses_one_ledger() {
        let cluster = Cluster::build(&small(LedgerMode::Shared), None).unwrap();
        let first = cluster.replicas()[0].engine.ledger().clone();
        for replica in cluster.replicas() {
            assert!(Arc::ptr_eq(&first, replica.engine.ledger()));
        }
        assert_eq!(first.read().total_supply(), 16_000);
    }

    #[test]
    fn rejects_degenerate_rosters() {
        let mut config = small(LedgerMode::PerReplica);
        config.accounts = Some(5);
        assert!(matches!(
            Cluster::build(&config, None),
            Err(SimulationError::TooFewAccounts { accounts: 5, institutions: 4 })
        ));
        config.validators = Some(0);
        assert!(matches!(
            Cluster::build(&config, None),
            Err(SimulationError::NoValidators)
        ));
    }

    #[test]
    fn rejects_unreachable_sealing_difficulty() {
        let mut config = small(LedgerMode::PerReplica);
        config.consensus.pow_difficulty = 64;
        assert!(matches!(
            Cluster::build(&config, None),
            Err(SimulationError::DifficultyTooHigh { difficulty: 64, max: MAX_POW_DIFFICULTY })
        ));
        config.consensus.pow_difficulty = MAX_POW_DIFFICULTY;
        assert!(Cluster::build(&config, None).is_ok());
    }

    #[test]
    fn submit_routes_to_serving_institution() {
        let cluster = Cluster::build(&small(LedgerMode::PerReplica), None).unwrap();
        let sender = cluster.replicas()[2].institution.accounts()[0].clone();
        let recipient = cluster.replicas()[2].institution.accounts()[1].clone();
        cluster
            .submit_transfer(&sender, &recipient, 50, TransactionType::C2C)
            .unwrap();
        assert_eq!(cluster.replicas()[2].institution.pool().size(), 1);
        assert_eq!(cluster.pool_depth(), 1);
        assert!(matches!(
            cluster.submit_transfer("NOBODY", &recipient, 1, TransactionType::C2C),
            Err(SimulationError::UnknownAccount(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn started_cluster_commits_and_stops() {
        let cluster = Cluster::build(&small(LedgerMode::PerReplica), None).unwrap();
        cluster.start();
        let sender = cluster.replicas()[0].institution.accounts()[0].clone();
        let recipient = cluster.replicas()[0].institution.accounts()[1].clone();
        cluster
            .submit_transfer(&sender, &recipient, 300, TransactionType::C2C)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        cluster.stop();
        let exits = cluster.join().await;
        assert_eq!(exits.len(), 4);
        assert!(exits.iter().all(|(_, e)| *e == Ok(RunnerExit::Shutdown)));

        let (agrees, common) = cluster.prefix_agreement();
        assert!(agrees);
        assert!(common >= 2);
        for replica in cluster.replicas() {
            let ledger = replica.engine.ledger().read();
            assert_eq!(ledger.balance(&sender), 700);
            assert_eq!(ledger.balance(&recipient), 1_300);
        }
        assert!(!cluster.journal().is_empty());
        assert!(cluster.audit().iter().all(|(_, r)| r.is_ok()));
    }
}

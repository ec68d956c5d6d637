//! # CLI Interface
//!
//! Defines the command-line argument structure for `settlenet-node` using
//! `clap` derive. Three subcommands: `run`, `simulate` and `version`.
//!
//! Cluster settings resolve in three layers: the [`SimulationConfig`]
//! defaults, then the JSON file named by `--config`, then individual
//! flags (or their `SETTLENET_*` environment variables).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use settlenet_protocol::simulation::{LedgerMode, Scenario, SignerKind, SimulationConfig};

use crate::logging::LogFormat;

/// Settlement network node.
///
/// Runs a cluster of validating financial institutions in one process,
/// feeds it a synthetic transfer workload, and serves the replicated
/// ledger over HTTP with Prometheus metrics alongside.
#[derive(Parser, Debug)]
#[command(
    name = "settlenet-node",
    about = "Settlement network node",
    version,
    propagate_version = true
)]
pub struct SettlenetCli {
    /// Log output format.
    #[arg(
        long,
        global = true,
        value_enum,
        env = "SETTLENET_LOG_FORMAT",
        default_value_t = LogFormat::Pretty
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the cluster and serve its API until interrupted.
    Run(RunArgs),
    /// Run a bounded simulation and print the JSON report.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Settings shared by `run` and `simulate`.
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// JSON file with a full or partial simulation config.
    #[arg(long, short = 'c', env = "SETTLENET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Load preset: low, medium or peak.
    #[arg(long, env = "SETTLENET_SCENARIO")]
    pub scenario: Option<Scenario>,

    /// Number of validating institutions.
    #[arg(long, env = "SETTLENET_VALIDATORS")]
    pub validators: Option<usize>,

    /// Number of customer accounts.
    #[arg(long, env = "SETTLENET_ACCOUNTS")]
    pub accounts: Option<usize>,

    /// Balance minted to each account before the run.
    #[arg(long, env = "SETTLENET_INITIAL_BALANCE")]
    pub initial_balance: Option<u64>,

    /// Transfers to submit before the workload stops.
    #[arg(long, env = "SETTLENET_TARGET")]
    pub target: Option<u64>,

    /// Upper bound on the workload phase, in milliseconds.
    #[arg(long, env = "SETTLENET_DURATION_MS")]
    pub duration_ms: Option<u64>,

    /// Workload RNG seed.
    #[arg(long, env = "SETTLENET_SEED")]
    pub seed: Option<u64>,

    /// `per-replica` or `shared`.
    #[arg(long, env = "SETTLENET_LEDGER_MODE", value_parser = parse_ledger_mode)]
    pub ledger_mode: Option<LedgerMode>,

    /// `mock` or `ed25519` vote acknowledgements.
    #[arg(long, env = "SETTLENET_SIGNER", value_parser = parse_signer)]
    pub signer: Option<SignerKind>,

    /// Leader proposal cadence, in milliseconds.
    #[arg(long, env = "SETTLENET_PROPOSE_INTERVAL_MS")]
    pub propose_interval_ms: Option<u64>,
}

impl ClusterArgs {
    /// Builds the effective config: defaults, then the file, then flags.
    pub fn resolve(&self) -> Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => SimulationConfig::default(),
        };

        if let Some(scenario) = self.scenario {
            config.scenario = scenario;
        }
        if self.validators.is_some() {
            config.validators = self.validators;
        }
        if self.accounts.is_some() {
            config.accounts = self.accounts;
        }
        if let Some(balance) = self.initial_balance {
            config.initial_balance = balance;
        }
        if self.target.is_some() {
            config.target_transactions = self.target;
        }
        if let Some(duration) = self.duration_ms {
            config.duration_ms = duration;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(mode) = self.ledger_mode {
            config.ledger_mode = mode;
        }
        if let Some(signer) = self.signer {
            config.signer = signer;
        }
        if let Some(interval) = self.propose_interval_ms {
            config.consensus.propose_interval_ms = interval;
        }
        Ok(config)
    }
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Address the HTTP listeners bind to.
    #[arg(long, env = "SETTLENET_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the REST API.
    #[arg(long, env = "SETTLENET_HTTP_PORT", default_value_t = 9741)]
    pub http_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "SETTLENET_METRICS_PORT", default_value_t = 9742)]
    pub metrics_port: u16,

    /// How often gauges are refreshed from the engines, in milliseconds.
    #[arg(long, env = "SETTLENET_SAMPLE_INTERVAL_MS", default_value_t = 1_000)]
    pub sample_interval_ms: u64,
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Print the report on one line instead of pretty-printed.
    #[arg(long)]
    pub compact: bool,
}

fn parse_ledger_mode(s: &str) -> Result<LedgerMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "per-replica" | "per_replica" => Ok(LedgerMode::PerReplica),
        "shared" => Ok(LedgerMode::Shared),
        other => Err(format!("unknown ledger mode: {other}")),
    }
}

fn parse_signer(s: &str) -> Result<SignerKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "mock" => Ok(SignerKind::Mock),
        "ed25519" => Ok(SignerKind::Ed25519),
        other => Err(format!("unknown signer: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        SettlenetCli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = SettlenetCli::try_parse_from([
            "settlenet-node",
            "simulate",
            "--scenario",
            "medium",
            "--validators",
            "7",
            "--ledger-mode",
            "shared",
            "--signer",
            "ed25519",
            "--propose-interval-ms",
            "50",
        ])
        .unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        let config = args.cluster.resolve().unwrap();
        assert_eq!(config.scenario, Scenario::Medium);
        assert_eq!(config.validator_count(), 7);
        assert_eq!(config.ledger_mode, LedgerMode::Shared);
        assert_eq!(config.signer, SignerKind::Ed25519);
        assert_eq!(config.consensus.propose_interval_ms, 50);
    }

    #[test]
    fn unset_flags_keep_defaults() {
        let config = ClusterArgs::default().resolve().unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn rejects_unknown_ledger_mode() {
        assert!(parse_ledger_mode("replicated").is_err());
        assert_eq!(parse_ledger_mode("PER-REPLICA"), Ok(LedgerMode::PerReplica));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let args = ClusterArgs {
            config: Some(PathBuf::from("/nonexistent/settlenet.json")),
            ..ClusterArgs::default()
        };
        let err = args.resolve().unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}

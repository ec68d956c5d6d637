// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Settlement Network Node
//!
//! Entry point for the `settlenet-node` binary. Parses CLI arguments,
//! initializes logging and metrics, then either serves a running cluster
//! or executes one bounded simulation.
//!
//! - `run`      — start the cluster and workload, serve HTTP until interrupted
//! - `simulate` — run a bounded simulation and print the JSON report
//! - `version`  — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use settlenet_protocol::consensus::RunnerExit;
use settlenet_protocol::simulation::{run_simulation, Cluster, WorkloadGenerator};

use cli::{Commands, SettlenetCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SettlenetCli::parse();

    match cli.command {
        Commands::Run(args) => {
            logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.log_format);
            run_node(args).await
        }
        Commands::Simulate(args) => {
            logging::init_logging(logging::DEFAULT_DIRECTIVE, cli.log_format);
            simulate(args).await
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the cluster, the workload, the API server and the metrics
/// endpoint. Returns once a shutdown signal arrived and every runner
/// has exited.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config = args.cluster.resolve()?;

    tracing::info!(
        scenario = %config.scenario,
        validators = config.validator_count(),
        accounts = config.account_count(),
        http_port = args.http_port,
        metrics_port = args.metrics_port,
        "starting settlenet-node"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Cluster ---
    let cluster = Arc::new(
        Cluster::build(&config, Some(node_metrics.clone())).context("failed to build cluster")?,
    );
    cluster.start();

    // --- Workload ---
    let workload = {
        let cluster = Arc::clone(&cluster);
        let config = config.clone();
        tokio::spawn(async move {
            let mut generator =
                WorkloadGenerator::new(config.seed, cluster.accounts(), config.initial_balance);
            let submitted = cluster
                .run_workload(
                    &mut generator,
                    config.workload_tick(),
                    config.target(),
                    config.duration(),
                )
                .await;
            tracing::info!(
                submitted,
                refused = generator.refused(),
                "workload finished"
            );
        })
    };

    // --- Metrics sampling ---
    let sampler = {
        let cluster = Arc::clone(&cluster);
        let metrics = Arc::clone(&node_metrics);
        let period = Duration::from_millis(args.sample_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                metrics.sample(&cluster);
            }
        })
    };

    // --- API server ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            settlenet_protocol::config::PROTOCOL_VERSION,
        ),
        cluster: Arc::clone(&cluster),
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.http_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping replicas");
        }
    }

    cluster.stop();
    workload.abort();
    sampler.abort();
    let mut halted = 0;
    for (node, exit) in cluster.join().await {
        match exit {
            Ok(RunnerExit::Shutdown) => tracing::debug!(%node, "replica stopped"),
            Ok(other) => tracing::warn!(%node, exit = ?other, "replica ended early"),
            Err(e) => {
                halted += 1;
                tracing::error!(%node, error = %e, "replica halted");
            }
        }
    }
    metrics_final_sample(&node_metrics, &cluster);

    let (agrees, common_height) = cluster.prefix_agreement();
    tracing::info!(common_height, prefix_agreement = agrees, "settlenet-node stopped");
    if halted > 0 {
        anyhow::bail!("{halted} replica(s) halted on an integrity fault");
    }
    Ok(())
}

fn metrics_final_sample(metrics: &NodeMetrics, cluster: &Cluster) {
    metrics.sample(cluster);
    match metrics.encode() {
        Ok(text) => tracing::debug!(bytes = text.len(), "final metrics snapshot"),
        Err(e) => tracing::warn!(error = %e, "failed to encode final metrics"),
    }
}

/// Runs one bounded simulation and prints its report on stdout.
async fn simulate(args: cli::SimulateArgs) -> Result<()> {
    let config = args.cluster.resolve()?;
    let report = run_simulation(config)
        .await
        .context("simulation failed to start")?;

    let rendered = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{}", rendered);

    if !report.is_consistent() {
        anyhow::bail!(
            "simulation {} ended inconsistent (prefix agreement: {}, audits passed: {})",
            report.run_id,
            report.prefix_agreement,
            report.audits_passed
        );
    }
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("settlenet-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", settlenet_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

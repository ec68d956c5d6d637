//! # Prometheus Metrics
//!
//! Operational metrics for the in-process cluster, scraped at `/metrics`
//! on the metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the
//! `settlenet` prefix. Commit counters are driven by the [`Persistence`]
//! hook as blocks land. Views, heights, drop and certificate counters are
//! sampled from each engine by [`NodeMetrics::sample`].

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use settlenet_protocol::ledger::{Block, Persistence};
use settlenet_protocol::simulation::Cluster;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub blocks_committed_total: IntCounterVec,
    pub transactions_committed_total: IntCounterVec,
    pub messages_dropped_total: IntCounterVec,
    pub certificates_formed_total: IntCounterVec,
    pub current_view: IntGaugeVec,
    pub committed_height: IntGaugeVec,
    /// Transfers waiting in each institution's pool.
    pub pool_depth: IntGaugeVec,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("settlenet".into()), None)?;

        let blocks_committed_total = counter(
            &registry,
            "blocks_committed_total",
            "Blocks appended to the replica's ledger",
            "node",
        )?;
        let transactions_committed_total = counter(
            &registry,
            "transactions_committed_total",
            "Transactions applied by committed blocks",
            "node",
        )?;
        let messages_dropped_total = counter(
            &registry,
            "messages_dropped_total",
            "Proposals and votes the replica refused",
            "node",
        )?;
        let certificates_formed_total = counter(
            &registry,
            "certificates_formed_total",
            "Quorum certificates the replica assembled from votes",
            "node",
        )?;
        let current_view = gauge(&registry, "current_view", "Current consensus view", "node")?;
        let committed_height = gauge(
            &registry,
            "committed_height",
            "Height of the last committed block",
            "node",
        )?;
        let pool_depth = gauge(
            &registry,
            "pool_depth",
            "Transfers waiting in the institution pool",
            "institution",
        )?;

        Ok(Self {
            registry,
            blocks_committed_total,
            transactions_committed_total,
            messages_dropped_total,
            certificates_formed_total,
            current_view,
            committed_height,
            pool_depth,
        })
    }

    /// Copies the current engine and pool state into the gauges and
    /// catches the sampled counters up to the engine's own totals.
    pub fn sample(&self, cluster: &Cluster) {
        for replica in cluster.replicas() {
            let node = replica.engine.node_id();
            let status = replica.engine.status();
            let stats = replica.engine.stats();

            self.current_view
                .with_label_values(&[node])
                .set(status.current_view as i64);
            self.committed_height
                .with_label_values(&[node])
                .set(status.committed_height as i64);
            catch_up(&self.messages_dropped_total, node, stats.messages_dropped);
            catch_up(
                &self.certificates_formed_total,
                node,
                stats.certificates_formed,
            );

            let institution = replica.institution.id();
            self.pool_depth
                .with_label_values(&[institution])
                .set(replica.institution.pool().size() as i64);
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Persistence for NodeMetrics {
    fn on_block_committed(&self, node: &str, block: &Block) {
        self.blocks_committed_total.with_label_values(&[node]).inc();
        self.transactions_committed_total
            .with_label_values(&[node])
            .inc_by(block.tx_count() as u64);
    }
}

fn counter(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<IntCounterVec, prometheus::Error> {
    let metric = IntCounterVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn gauge(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<IntGaugeVec, prometheus::Error> {
    let metric = IntGaugeVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

/// Raises a sampled counter to `total`. Counters never go down.
fn catch_up(metric: &IntCounterVec, node: &str, total: u64) {
    let counter = metric.with_label_values(&[node]);
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

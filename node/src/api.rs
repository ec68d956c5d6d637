//! # REST API
//!
//! Builds the axum router that exposes the cluster's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                 | Description                              |
//! |--------|----------------------|------------------------------------------|
//! | GET    | `/health`            | Liveness probe                           |
//! | GET    | `/status`            | Per-replica consensus status             |
//! | GET    | `/validators`        | Validator roster                         |
//! | GET    | `/blocks`            | Latest committed blocks                  |
//! | GET    | `/blocks/:height`    | Committed block by height                |
//! | GET    | `/transactions/:id`  | Committed or pooled transaction          |
//! | GET    | `/accounts/:id`      | Account balance and history size         |
//! | GET    | `/audit`             | Chain and balance audit of every replica |
//! | POST   | `/transactions`      | Submit a transfer                        |
//! | POST   | `/views/advance`     | Move every replica one view forward      |
//!
//! Read endpoints answer from one replica's ledger, chosen with
//! `?node=FO_002`. Without it the first replica answers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use settlenet_protocol::consensus::EngineStatus;
use settlenet_protocol::institution::PoolError;
use settlenet_protocol::ledger::Block;
use settlenet_protocol::simulation::{Cluster, Replica, SimulationError};
use settlenet_protocol::transaction::{Transaction, TransactionType};

use crate::metrics::SharedMetrics;

/// Blocks returned by `GET /blocks` when no limit is given.
const DEFAULT_BLOCK_PAGE: usize = 20;

/// Hard cap on `GET /blocks?limit=`.
const MAX_BLOCK_PAGE: usize = 200;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub cluster: Arc<Cluster>,
    pub metrics: SharedMetrics,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/validators", get(validators_handler))
        .route("/blocks", get(blocks_handler))
        .route("/blocks/:height", get(block_by_height_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/transactions/:id", get(transaction_handler))
        .route("/accounts/:id", get(account_handler))
        .route("/audit", get(audit_handler))
        .route("/views/advance", post(advance_view_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Selects the replica whose ledger answers a read.
#[derive(Debug, Default, Deserialize)]
pub struct NodeQuery {
    pub node: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BlocksQuery {
    pub node: Option<String>,
    pub limit: Option<usize>,
}

/// Body of `POST /transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransferRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    /// Defaults to `C2C`.
    #[serde(default)]
    pub kind: Option<TransactionType>,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub validators: usize,
    pub quorum: usize,
    pub accounts: usize,
    /// Transfers still waiting in institution pools.
    pub pool_depth: usize,
    /// Height every replica has reached.
    pub common_height: u64,
    pub prefix_agreement: bool,
    pub replicas: Vec<ReplicaStatus>,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub node: String,
    pub current_view: u64,
    pub high_qc_view: u64,
    pub high_commit_qc_view: u64,
    pub locked_view: u64,
    pub committed_height: u64,
    pub pending_blocks: usize,
    pub running: bool,
    pub fault: Option<String>,
}

impl From<EngineStatus> for ReplicaStatus {
    fn from(status: EngineStatus) -> Self {
        Self {
            node: status.node_id,
            current_view: status.current_view,
            high_qc_view: status.high_qc_view,
            high_commit_qc_view: status.high_commit_qc_view,
            locked_view: status.locked_view,
            committed_height: status.committed_height,
            pending_blocks: status.pending_blocks,
            running: status.running,
            fault: status.fault,
        }
    }
}

/// Response payload for `GET /validators`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ValidatorResponse {
    pub id: String,
    pub weight: u64,
    /// Accounts the institution serves.
    pub accounts: usize,
    /// Whether this validator leads its own current view.
    pub is_primary: bool,
    pub current_view: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockSummary {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub tx_count: usize,
    pub timestamp: u64,
}

/// Response payload for `GET /blocks/:height`.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub height: u64,
    pub hash: String,
    pub previous_hash: String,
    pub timestamp: u64,
    pub nonce: u64,
    /// View of the certificate carried for the parent. `None` for genesis.
    pub parent_qc_view: Option<u64>,
    /// Acknowledgements in that certificate.
    pub parent_qc_signers: usize,
    pub transactions: Vec<TransactionResponse>,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        Self {
            height: block.index,
            hash: block.hash_hex(),
            previous_hash: hex::encode(block.previous_hash),
            tx_count: block.tx_count(),
            timestamp: block.timestamp,
        }
    }
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        Self {
            height: block.index,
            hash: block.hash_hex(),
            previous_hash: hex::encode(block.previous_hash),
            timestamp: block.timestamp,
            nonce: block.nonce,
            parent_qc_view: block.parent_qc.as_ref().map(|qc| qc.view),
            parent_qc_signers: block
                .parent_qc
                .as_ref()
                .map(|qc| qc.acks.len())
                .unwrap_or(0),
            transactions: block
                .transactions
                .iter()
                .map(|tx| TransactionResponse::new(tx, Some(block.index)))
                .collect(),
        }
    }
}

/// Response payload for `GET /transactions/:id` and `POST /transactions`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub institution: String,
    pub timestamp: u64,
    pub status: String,
    /// Height of the committing block. `None` while pooled or for mints.
    pub block_height: Option<u64>,
}

impl TransactionResponse {
    fn new(tx: &Transaction, block_height: Option<u64>) -> Self {
        Self {
            id: tx.id.clone(),
            kind: tx.kind.to_string(),
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
            amount: tx.amount,
            institution: tx.institution.clone(),
            timestamp: tx.timestamp,
            status: tx.status.to_string(),
            block_height,
        }
    }
}

/// Response payload for `GET /accounts/:id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub account: String,
    pub balance: u64,
    /// Institution serving the account, if any.
    pub institution: Option<String>,
    /// Committed transactions touching the account, mints included.
    pub history: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub node: String,
    pub passed: bool,
    pub fault: Option<String>,
}

/// Response payload for `GET /audit`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditResponse {
    pub passed: bool,
    pub prefix_agreement: bool,
    pub common_height: u64,
    pub replicas: Vec<AuditEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdvanceViewResponse {
    pub views: Vec<u64>,
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

/// Replica named by `node`, or the first one.
fn reference<'a>(cluster: &'a Cluster, node: Option<&str>) -> Result<&'a Replica, Response> {
    match node {
        Some(id) => cluster
            .replica(id)
            .ok_or_else(|| error_response(StatusCode::NOT_FOUND, format!("unknown node {id}"))),
        None => cluster
            .replicas()
            .first()
            .ok_or_else(|| error_response(StatusCode::SERVICE_UNAVAILABLE, "cluster has no replicas")),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the process is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — consensus position of every replica.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cluster = &state.cluster;
    let (prefix_agreement, common_height) = cluster.prefix_agreement();
    let (validators, quorum) = cluster
        .replicas()
        .first()
        .map(|r| {
            let set = r.engine.validators();
            (set.len(), set.quorum_threshold())
        })
        .unwrap_or((0, 0));

    Json(StatusResponse {
        version: state.version.clone(),
        validators,
        quorum,
        accounts: cluster.accounts().len(),
        pool_depth: cluster.pool_depth(),
        common_height,
        prefix_agreement,
        replicas: cluster.status().into_iter().map(ReplicaStatus::from).collect(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /validators` — the roster, in primary-rotation order.
async fn validators_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cluster = &state.cluster;
    let Some(first) = cluster.replicas().first() else {
        return Json(Vec::<ValidatorResponse>::new());
    };
    let validators: Vec<ValidatorResponse> = first
        .engine
        .validators()
        .validators()
        .into_iter()
        .map(|info| {
            let replica = cluster.replica(&info.id);
            ValidatorResponse {
                accounts: replica
                    .map(|r| r.institution.accounts().len())
                    .unwrap_or(0),
                is_primary: replica.map(|r| r.engine.is_primary()).unwrap_or(false),
                current_view: replica.map(|r| r.engine.current_view()).unwrap_or(0),
                id: info.id,
                weight: info.weight,
            }
        })
        .collect();
    Json(validators)
}

/// `GET /blocks` — latest committed blocks, newest first.
async fn blocks_handler(
    Query(query): Query<BlocksQuery>,
    State(state): State<AppState>,
) -> Response {
    let replica = match reference(&state.cluster, query.node.as_deref()) {
        Ok(replica) => replica,
        Err(resp) => return resp,
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_BLOCK_PAGE)
        .min(MAX_BLOCK_PAGE);
    let ledger = replica.engine.ledger().read();
    let blocks: Vec<BlockSummary> = ledger
        .chain()
        .iter()
        .rev()
        .take(limit)
        .map(BlockSummary::from)
        .collect();
    Json(blocks).into_response()
}

/// `GET /blocks/:height` — a committed block with its transactions.
async fn block_by_height_handler(
    Path(height): Path<u64>,
    Query(query): Query<NodeQuery>,
    State(state): State<AppState>,
) -> Response {
    let replica = match reference(&state.cluster, query.node.as_deref()) {
        Ok(replica) => replica,
        Err(resp) => return resp,
    };
    let ledger = replica.engine.ledger().read();
    match ledger.block_at(height) {
        Some(block) => Json(BlockResponse::from(block)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Block not found at height {height}"),
        ),
    }
}

/// `GET /transactions/:id` — looks in the committed chain, then the
/// issuance log, then every institution pool.
async fn transaction_handler(
    Path(id): Path<String>,
    Query(query): Query<NodeQuery>,
    State(state): State<AppState>,
) -> Response {
    let replica = match reference(&state.cluster, query.node.as_deref()) {
        Ok(replica) => replica,
        Err(resp) => return resp,
    };
    {
        let ledger = replica.engine.ledger().read();
        let committed = ledger.chain().iter().find_map(|block| {
            block
                .transactions
                .iter()
                .find(|tx| tx.id == id)
                .map(|tx| TransactionResponse::new(tx, Some(block.index)))
        });
        if let Some(found) = committed {
            return Json(found).into_response();
        }
        if let Some(mint) = ledger.issuance().iter().find(|tx| tx.id == id) {
            return Json(TransactionResponse::new(mint, None)).into_response();
        }
    }
    let pooled = state
        .cluster
        .institutions()
        .iter()
        .find_map(|institution| institution.pool().get(&id));
    match pooled {
        Some(tx) => Json(TransactionResponse::new(&tx, None)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Transaction not found: {id}"),
        ),
    }
}

/// `GET /accounts/:id` — committed balance as seen by one replica.
async fn account_handler(
    Path(id): Path<String>,
    Query(query): Query<NodeQuery>,
    State(state): State<AppState>,
) -> Response {
    let replica = match reference(&state.cluster, query.node.as_deref()) {
        Ok(replica) => replica,
        Err(resp) => return resp,
    };
    let institution = state
        .cluster
        .institutions()
        .iter()
        .find(|i| i.serves(&id))
        .map(|i| i.id().to_string());
    let ledger = replica.engine.ledger().read();
    let history = ledger.history(&id).len();
    if institution.is_none() && history == 0 {
        return error_response(StatusCode::NOT_FOUND, format!("unknown account {id}"));
    }
    Json(AccountResponse {
        balance: ledger.balance(&id),
        account: id,
        institution,
        history,
    })
    .into_response()
}

/// `GET /audit` — re-verifies every ledger. A replica that fails halts.
async fn audit_handler(State(state): State<AppState>) -> impl IntoResponse {
    let replicas: Vec<AuditEntry> = state
        .cluster
        .audit()
        .into_iter()
        .map(|(node, result)| AuditEntry {
            node,
            passed: result.is_ok(),
            fault: result.err().map(|f| f.to_string()),
        })
        .collect();
    let (prefix_agreement, common_height) = state.cluster.prefix_agreement();
    let passed = prefix_agreement && replicas.iter().all(|r| r.passed);
    let status = if passed {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (
        status,
        Json(AuditResponse {
            passed,
            prefix_agreement,
            common_height,
            replicas,
        }),
    )
}

/// `POST /transactions` — pools a transfer at the sender's institution.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitTransferRequest>,
) -> Response {
    let kind = req.kind.unwrap_or(TransactionType::C2C);
    if kind == TransactionType::Mint {
        return error_response(
            StatusCode::BAD_REQUEST,
            "mint transactions cannot be submitted",
        );
    }
    match state
        .cluster
        .submit_transfer(&req.sender, &req.recipient, req.amount, kind)
    {
        Ok(tx) => {
            tracing::debug!(tx = %tx.id, sender = %tx.sender, "transfer accepted over http");
            (StatusCode::ACCEPTED, Json(TransactionResponse::new(&tx, None))).into_response()
        }
        Err(e) => {
            let status = match &e {
                SimulationError::UnknownAccount(_) => StatusCode::NOT_FOUND,
                SimulationError::Pool(PoolError::Duplicate(_)) => StatusCode::CONFLICT,
                SimulationError::Pool(
                    PoolError::PoolFull { .. } | PoolError::SenderLimitExceeded { .. },
                ) => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_REQUEST,
            };
            error_response(status, e.to_string())
        }
    }
}

/// `POST /views/advance` — external view bump for a stalled cluster.
async fn advance_view_handler(State(state): State<AppState>) -> impl IntoResponse {
    let views = state.cluster.bump_view();
    tracing::info!(?views, "views advanced over http");
    Json(AdvanceViewResponse { views })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use settlenet_protocol::simulation::SimulationConfig;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::metrics::NodeMetrics;

    /// Four replicas, sixteen accounts of 1 000 each. Runners not started.
    fn test_app_state() -> AppState {
        let config = SimulationConfig {
            validators: Some(4),
            accounts: Some(16),
            initial_balance: 1_000,
            ..SimulationConfig::default()
        };
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let cluster = Cluster::build(&config, Some(metrics.clone())).unwrap();
        AppState {
            version: "0.1.0-test".into(),
            cluster: Arc::new(cluster),
            metrics,
        }
    }

    fn account(state: &AppState, institution: usize, slot: usize) -> String {
        state.cluster.replicas()[institution].institution.accounts()[slot].clone()
    }

    /// Sends a GET request and returns the (status, body_bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    /// Sends a POST request with JSON body and returns (status, body_bytes).
    async fn post_json(
        router: &Router,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, body)
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_every_replica_at_genesis() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.validators, 4);
        assert_eq!(resp.quorum, 3);
        assert_eq!(resp.accounts, 16);
        assert_eq!(resp.common_height, 0);
        assert!(resp.prefix_agreement);
        assert_eq!(resp.replicas.len(), 4);
        assert!(resp.replicas.iter().all(|r| r.running && r.current_view == 0));
    }

    #[tokio::test]
    async fn validators_lists_roster_in_order() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/validators").await;

        assert_eq!(status, StatusCode::OK);
        let resp: Vec<ValidatorResponse> = serde_json::from_slice(&body).unwrap();
        let ids: Vec<&str> = resp.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["FO_001", "FO_002", "FO_003", "FO_004"]);
        assert!(resp[0].is_primary);
        assert!(!resp[1].is_primary);
        assert!(resp.iter().all(|v| v.accounts == 4 && v.weight == 1));
    }

    #[tokio::test]
    async fn genesis_block_is_served() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/blocks/0").await;

        assert_eq!(status, StatusCode::OK);
        let resp: BlockResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.height, 0);
        assert_eq!(resp.previous_hash, "0".repeat(64));
        assert!(resp.parent_qc_view.is_none());
        assert!(resp.transactions.is_empty());
    }

    #[tokio::test]
    async fn missing_block_and_unknown_node_are_404() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/blocks/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = get(&router, "/blocks/0?node=FO_099").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("FO_099"));
    }

    #[tokio::test]
    async fn account_reports_minted_balance() {
        let state = test_app_state();
        let id = account(&state, 1, 0);
        let router = create_router(state);
        let (status, body) = get(&router, &format!("/accounts/{id}")).await;

        assert_eq!(status, StatusCode::OK);
        let resp: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.balance, 1_000);
        assert_eq!(resp.institution.as_deref(), Some("FO_002"));
        assert_eq!(resp.history, 1);

        let (status, _) = get(&router, "/accounts/NOBODY").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submitted_transfer_is_pooled_and_findable() {
        let state = test_app_state();
        let sender = account(&state, 0, 0);
        let recipient = account(&state, 0, 1);
        let router = create_router(state.clone());

        let (status, body) = post_json(
            &router,
            "/transactions",
            serde_json::json!({ "sender": sender, "recipient": recipient, "amount": 250 }),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let submitted: TransactionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(submitted.kind, TransactionType::C2C.to_string());
        assert_eq!(submitted.institution, "FO_001");
        assert_eq!(state.cluster.pool_depth(), 1);

        let (status, body) = get(&router, &format!("/transactions/{}", submitted.id)).await;
        assert_eq!(status, StatusCode::OK);
        let found: TransactionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(found.amount, 250);
        assert!(found.block_height.is_none());
    }

    #[tokio::test]
    async fn submit_refuses_mint_and_unknown_sender() {
        let state = test_app_state();
        let recipient = account(&state, 0, 1);
        let router = create_router(state);

        let (status, _) = post_json(
            &router,
            "/transactions",
            serde_json::json!({ "sender": "NOBODY", "recipient": recipient, "amount": 5 }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = post_json(
            &router,
            "/transactions",
            serde_json::json!({
                "sender": "NOBODY", "recipient": recipient, "amount": 5, "kind": "Mint"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_transaction_is_404() {
        let router = create_router(test_app_state());
        let (status, _) = get(&router, "/transactions/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn advance_moves_every_replica() {
        let state = test_app_state();
        let router = create_router(state.clone());
        let (status, body) = post_json(&router, "/views/advance", serde_json::json!({})).await;

        assert_eq!(status, StatusCode::OK);
        let resp: AdvanceViewResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.views, vec![1, 1, 1, 1]);
        assert!(state.cluster.status().iter().all(|s| s.current_view == 1));
    }

    #[tokio::test]
    async fn audit_passes_on_fresh_cluster() {
        let router = create_router(test_app_state());
        let (status, body) = get(&router, "/audit").await;

        assert_eq!(status, StatusCode::OK);
        let resp: AuditResponse = serde_json::from_slice(&body).unwrap();
        assert!(resp.passed);
        assert_eq!(resp.replicas.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn committed_transfer_is_served_with_its_block() {
        let state = test_app_state();
        let sender = account(&state, 0, 0);
        let recipient = account(&state, 0, 1);
        state.cluster.start();
        let router = create_router(state.clone());

        let (_, body) = post_json(
            &router,
            "/transactions",
            serde_json::json!({ "sender": sender, "recipient": recipient, "amount": 300 }),
        )
        .await;
        let submitted: TransactionResponse = serde_json::from_slice(&body).unwrap();

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        state.cluster.stop();
        state.cluster.join().await;

        let (status, body) = get(&router, &format!("/transactions/{}?node=FO_003", submitted.id)).await;
        assert_eq!(status, StatusCode::OK);
        let found: TransactionResponse = serde_json::from_slice(&body).unwrap();
        let height = found.block_height.unwrap();
        assert_eq!(found.status, "Confirmed");

        let (_, body) = get(&router, &format!("/blocks/{height}")).await;
        let block: BlockResponse = serde_json::from_slice(&body).unwrap();
        assert!(block.transactions.iter().any(|tx| tx.id == submitted.id));

        let (status, body) = get(&router, "/blocks/2").await;
        assert_eq!(status, StatusCode::OK);
        let second: BlockResponse = serde_json::from_slice(&body).unwrap();
        assert!(second.parent_qc_view.is_some());
        assert!(second.parent_qc_signers >= 3);

        let (_, body) = get(&router, &format!("/accounts/{sender}")).await;
        let resp: AccountResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.balance, 700);

        let (_, body) = get(&router, "/blocks?limit=1").await;
        let latest: Vec<BlockSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(latest.len(), 1);
        assert!(latest[0].height >= height);

        let text = state.metrics.encode().unwrap();
        assert!(text.contains("settlenet_blocks_committed_total{node=\"FO_001\"}"));
    }
}

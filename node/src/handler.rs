//! HTTP request surface.
//!
//! Every endpoint reads from an MVCC snapshot or goes through the
//! `NodeService` write region; handlers never hold locks across await
//! points. Rejections carry the machine-readable reason code plus a
//! human-readable message.
//!
//! Peer-relayed gossip (`receive_transaction`, relayed `submit_block`)
//! always answers 200 with `accepted: false` on benign rejections, since
//! a duplicate relay must not count against the sender's health.

use crate::peers::PeerManager;
use crate::service::{NodeService, SubmitOutcome};
use crate::sync;
use crate::wire::*;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chaincore::crypto::Address;
use chaincore::error::ChainError;
use chaincore::types::Transaction;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NodeService>,
    pub peers: Arc<PeerManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/blockchain", get(blockchain))
        .route("/blocks/range", get(blocks_range))
        .route("/balance/:address", get(balance))
        .route("/utxos/:address", get(utxos))
        .route("/transactions/:address", get(transactions))
        .route("/transaction_pool", get(transaction_pool))
        .route("/add_transaction", post(add_transaction))
        .route("/broadcast_transaction", post(add_transaction))
        .route("/receive_transaction", post(receive_transaction))
        .route("/mine_block", post(mine_block))
        .route("/submit_block", post(submit_block))
        .route("/sync_mempool", post(sync_mempool))
        .route("/peers", get(peers_list))
        .route("/discover_peers", post(discover_peers))
        .route("/network_config", get(network_config))
        .route("/orphaned_blocks", get(orphaned_blocks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ledger rejections mapped onto HTTP statuses.
pub struct ApiError(ChainError);

impl From<ChainError> for ApiError {
    fn from(e: ChainError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChainError::StaleTemplate(_) => StatusCode::CONFLICT,
            ChainError::MempoolFull(_) => StatusCode::TOO_MANY_REQUESTS,
            ChainError::Consistency(_) | ChainError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = RejectResponse {
            accepted: false,
            code: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let ledger = state.service.state();
    Json(StatusResponse {
        node_id: state.service.node_id(),
        chain_length: ledger.chain.len() as u64,
        tip_hash: ledger.chain.tip().hash(),
        target_difficulty: state.service.next_difficulty(),
        cumulative_work: ledger.chain.cumulative_work().to_string(),
        active_peers: state.peers.active_count(),
        pending_tx_count: ledger.mempool.len(),
        uptime_s: state.service.uptime_secs(),
        degraded: state.service.is_degraded(),
    })
}

async fn blockchain(State(state): State<AppState>) -> Json<ChainResponse> {
    let ledger = state.service.state();
    Json(ChainResponse {
        length: ledger.chain.len() as u64,
        chain: ledger
            .chain
            .blocks()
            .map(|block| BlockView::from_block(block.as_ref()))
            .collect(),
    })
}

#[derive(Deserialize)]
struct RangeParams {
    start: u64,
    end: u64,
}

async fn blocks_range(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Vec<BlockView>>, ApiError> {
    if params.start > params.end {
        return Err(ChainError::malformed("range start is after end").into());
    }
    let ledger = state.service.state();
    let end = params.end.min(ledger.chain.height());
    let views = (params.start..=end)
        .filter_map(|index| ledger.chain.get(index))
        .map(|block| BlockView::from_block(block.as_ref()))
        .collect();
    Ok(Json(views))
}

async fn balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = Address::parse(&address)?;

    // The cache is authoritative for every address it has seen; fall back
    // to live UTXO aggregation only for unknown addresses (or while the
    // store is unreachable, since reads must keep working).
    match state.service.store().balance(&address).await {
        Ok(Some(row)) => {
            return Ok(Json(BalanceResponse {
                address: row.address,
                balance: row.balance,
                utxo_count: row.utxo_count,
                last_activity_block: row.last_activity_block,
                source: "cache".to_string(),
            }))
        }
        Ok(None) => {}
        Err(e) => warn!("balance cache read failed, serving from UTXO set: {e}"),
    }

    let ledger = state.service.state();
    let snapshot = ledger.utxo.snapshot();
    let held = snapshot.utxos_for(&address);
    Ok(Json(BalanceResponse {
        balance: snapshot.balance_of(&address),
        utxo_count: held.len() as u64,
        last_activity_block: held
            .iter()
            .map(|(_, utxo)| utxo.block_height)
            .max()
            .unwrap_or(0),
        address,
        source: "utxo_fallback".to_string(),
    }))
}

async fn utxos(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<UtxoListResponse>, ApiError> {
    let address = Address::parse(&address)?;
    let ledger = state.service.state();
    let utxos = ledger
        .utxo
        .snapshot()
        .utxos_for(&address)
        .into_iter()
        .map(|(outpoint, utxo)| UtxoView {
            tx_id: outpoint.tx_id,
            output_index: outpoint.output_index,
            amount: utxo.amount,
            recipient_address: utxo.recipient_address,
            block_height: utxo.block_height,
        })
        .collect();
    Ok(Json(UtxoListResponse { address, utxos }))
}

async fn transactions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AddressTransactionsResponse>, ApiError> {
    let address = Address::parse(&address)?;
    let transactions = state
        .service
        .transactions_for_address(&address)
        .into_iter()
        .map(|(block_index, tx)| AddressTransaction {
            block_index,
            transaction: TxView::from_tx(&tx),
        })
        .collect();
    Ok(Json(AddressTransactionsResponse {
        address,
        transactions,
    }))
}

async fn transaction_pool(State(state): State<AppState>) -> Json<MempoolResponse> {
    let ledger = state.service.state();
    let transactions = ledger
        .mempool
        .sorted_entries()
        .into_iter()
        .map(|entry| PooledTransaction {
            fee: entry.fee,
            size_bytes: entry.size_bytes,
            admitted_at: entry.admitted_at,
            transaction: TxView::from_tx(entry.transaction.as_ref()),
        })
        .collect();
    Json(MempoolResponse {
        count: ledger.mempool.len(),
        total_bytes: ledger.mempool.total_bytes(),
        transactions,
    })
}

/// `add_transaction` and `broadcast_transaction`: validate, admit, gossip.
async fn add_transaction(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<Json<AdmitResponse>, ApiError> {
    let tx_id = state.service.admit_transaction(tx.clone()).await?;
    state.peers.broadcast_transaction(&tx, None);
    Ok(Json(AdmitResponse {
        accepted: true,
        tx_id,
    }))
}

/// Peer relay path: admit, then forward to everyone except the origin.
/// Benign rejections answer 200 so relays do not hurt the sender's health.
async fn receive_transaction(
    State(state): State<AppState>,
    Json(request): Json<ReceiveTransactionRequest>,
) -> Json<serde_json::Value> {
    let tx = request.transaction;
    match state.service.admit_transaction(tx.clone()).await {
        Ok(tx_id) => {
            state.peers.broadcast_transaction(&tx, request.origin_url);
            Json(json!({ "accepted": true, "tx_id": tx_id }))
        }
        Err(e) => Json(json!({
            "accepted": false,
            "code": e.code(),
            "message": e.to_string(),
        })),
    }
}

async fn mine_block(
    State(state): State<AppState>,
    Json(request): Json<TemplateRequest>,
) -> Result<Json<crate::service::BlockTemplate>, ApiError> {
    let template = state.service.request_template(request.miner_address).await?;
    Ok(Json(template))
}

async fn submit_block(
    State(state): State<AppState>,
    Json(request): Json<SubmitBlockRequest>,
) -> Result<Response, ApiError> {
    let relayed = !request.locally_mined;
    let origin = request.origin_url.clone();
    let block = match request.block.into_block() {
        Ok(block) => block,
        Err(e) if relayed => return Ok(reject_ok(e)),
        Err(e) => return Err(e.into()),
    };

    let outcome = state
        .service
        .submit_block(block.clone(), request.locally_mined, request.stats)
        .await;
    match outcome {
        Ok(outcome) => {
            if matches!(outcome, SubmitOutcome::Appended | SubmitOutcome::Replaced) {
                state.peers.broadcast_block(&block, origin);
            }
            let body = SubmitBlockResponse {
                accepted: outcome != SubmitOutcome::Orphaned,
                outcome,
                chain_length: state.service.state().chain.len() as u64,
            };
            Ok(Json(body).into_response())
        }
        Err(e) if relayed => Ok(reject_ok(e)),
        Err(e) => Err(e.into()),
    }
}

fn reject_ok(e: ChainError) -> Response {
    Json(RejectResponse {
        accepted: false,
        code: e.code().to_string(),
        message: e.to_string(),
    })
    .into_response()
}

/// Force one mempool pull round now.
async fn sync_mempool(State(state): State<AppState>) -> Json<serde_json::Value> {
    sync::mempool_sync_round(&state.service, &state.peers).await;
    let ledger = state.service.state();
    Json(json!({
        "synced": true,
        "pending_tx_count": ledger.mempool.len(),
    }))
}

async fn peers_list(State(state): State<AppState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.peers.snapshot(),
        active_peers: state.peers.active_count(),
    })
}

/// Force a discovery round now.
async fn discover_peers(State(state): State<AppState>) -> Json<PeersResponse> {
    state.peers.discover(state.service.store()).await;
    Json(PeersResponse {
        peers: state.peers.snapshot(),
        active_peers: state.peers.active_count(),
    })
}

async fn network_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.service.config();
    Json(json!({
        "consensus": config.consensus,
        "peers": {
            "min_peers": config.node.min_peers,
            "target_peers": config.node.target_peers,
            "max_peers": config.node.max_peers,
        },
        "intervals": {
            "discovery_interval_s": config.node.discovery_interval_secs,
            "sync_interval_s": config.node.sync_interval_secs,
            "mempool_sync_interval_s": config.node.mempool_sync_interval_secs,
        },
    }))
}

async fn orphaned_blocks(State(state): State<AppState>) -> Json<OrphansResponse> {
    let blocks: Vec<BlockView> = state
        .service
        .orphan_blocks()
        .iter()
        .map(BlockView::from_block)
        .collect();
    Json(OrphansResponse {
        count: blocks.len(),
        blocks,
    })
}

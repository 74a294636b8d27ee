//! Peer discovery, health tracking, and gossip fan-out.
//!
//! Peers live in a concurrent map; every outbound call carries a deadline
//! and a failed call bumps the peer's failure counter. A peer past the
//! failure threshold goes inactive and is retried on an exponential
//! backoff schedule. Fan-out is bounded globally (at most `MAX_PEERS`
//! in-flight pushes) and per peer (at most 2), so a slow peer cannot
//! absorb the worker pool.

use crate::store::LedgerStore;
use crate::wire::{
    BlockView, ChainResponse, MempoolResponse, PeerInfo, PeersResponse, ReceiveTransactionRequest,
    StatusResponse, SubmitBlockRequest,
};
use chaincore::config::ChainConfig;
use chaincore::types::{Block, Transaction};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub url: String,
    pub last_probe_ok: bool,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    inflight: Arc<Semaphore>,
}

impl PeerRecord {
    fn new(url: String) -> Self {
        PeerRecord {
            url,
            last_probe_ok: false,
            last_probe_time: None,
            consecutive_failures: 0,
            next_retry_at: None,
            // Per-peer concurrency bound: at most 2 in-flight pushes
            inflight: Arc::new(Semaphore::new(2)),
        }
    }

    fn is_active(&self, failure_threshold: u32) -> bool {
        if self.consecutive_failures < failure_threshold {
            return true;
        }
        // Inactive, but due for a backoff retry
        match self.next_retry_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }
}

pub struct PeerManager {
    config: &'static ChainConfig,
    client: reqwest::Client,
    peers: DashMap<String, PeerRecord>,
    /// Global fan-out bound across all gossip pushes.
    fanout: Arc<Semaphore>,
}

impl PeerManager {
    pub fn new(config: &'static ChainConfig) -> Arc<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.node.push_timeout_secs))
            .build()
            .expect("BUG: reqwest client construction cannot fail");
        let manager = Arc::new(PeerManager {
            config,
            client,
            peers: DashMap::new(),
            fanout: Arc::new(Semaphore::new(config.node.max_peers)),
        });
        for url in &config.node.bootstrap_peers {
            manager.register(url);
        }
        manager
    }

    pub fn self_url(&self) -> &str {
        &self.config.node.self_url
    }

    /// Add a peer unless it is us, already known, or over the budget.
    pub fn register(&self, url: &str) -> bool {
        let url = url.trim_end_matches('/').to_string();
        if url.is_empty() || url == self.self_url() {
            return false;
        }
        if self.peers.contains_key(&url) {
            return false;
        }
        if self.peers.len() >= self.config.node.max_peers {
            debug!(%url, "peer budget exhausted, ignoring");
            return false;
        }
        info!(%url, "registered peer");
        self.peers.insert(url.clone(), PeerRecord::new(url));
        true
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn active_urls(&self) -> Vec<String> {
        let threshold = self.config.node.peer_failure_threshold;
        self.peers
            .iter()
            .filter(|entry| entry.value().is_active(threshold))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active_urls().len()
    }

    pub fn snapshot(&self) -> Vec<PeerInfo> {
        let threshold = self.config.node.peer_failure_threshold;
        let mut listed: Vec<PeerInfo> = self
            .peers
            .iter()
            .map(|entry| {
                let record = entry.value();
                PeerInfo {
                    url: record.url.clone(),
                    last_probe_ok: record.last_probe_ok,
                    last_probe_time: record.last_probe_time,
                    consecutive_failures: record.consecutive_failures,
                    active: record.is_active(threshold),
                }
            })
            .collect();
        listed.sort_by(|a, b| a.url.cmp(&b.url));
        listed
    }

    fn record_success(&self, url: &str) {
        if let Some(mut record) = self.peers.get_mut(url) {
            record.last_probe_ok = true;
            record.last_probe_time = Some(Utc::now());
            record.consecutive_failures = 0;
            record.next_retry_at = None;
        }
    }

    fn record_failure(&self, url: &str) {
        if let Some(mut record) = self.peers.get_mut(url) {
            record.last_probe_ok = false;
            record.last_probe_time = Some(Utc::now());
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            // Exponential backoff, capped at ~4 minutes
            let exponent = record
                .consecutive_failures
                .saturating_sub(self.config.node.peer_failure_threshold)
                .min(5);
            let delay = self.config.node.push_timeout_secs.max(1) << exponent;
            record.next_retry_at = Some(Utc::now() + ChronoDuration::seconds(delay as i64));
        }
    }

    /// GET with the per-call deadline; success/failure feeds peer health.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, path: &str) -> Option<T> {
        let result = self
            .client
            .get(format!("{url}{path}"))
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(resp) => match resp.json::<T>().await {
                Ok(body) => {
                    self.record_success(url);
                    Some(body)
                }
                Err(e) => {
                    warn!(%url, path, "peer sent malformed body: {e}");
                    self.record_failure(url);
                    None
                }
            },
            Err(e) => {
                debug!(%url, path, "peer request failed: {e}");
                self.record_failure(url);
                None
            }
        }
    }

    async fn post_json<B: serde::Serialize>(&self, url: &str, path: &str, body: &B) -> bool {
        let result = self
            .client
            .post(format!("{url}{path}"))
            .json(body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match result {
            Ok(_) => {
                self.record_success(url);
                true
            }
            Err(e) => {
                debug!(%url, path, "peer push failed: {e}");
                self.record_failure(url);
                false
            }
        }
    }

    pub async fn fetch_status(&self, url: &str) -> Option<StatusResponse> {
        self.get_json(url, "/status").await
    }

    pub async fn fetch_chain(&self, url: &str) -> Option<Vec<Block>> {
        let response: ChainResponse = self.get_json(url, "/blockchain").await?;
        decode_blocks(url, response.chain)
    }

    pub async fn fetch_range(&self, url: &str, start: u64, end: u64) -> Option<Vec<Block>> {
        let views: Vec<BlockView> = self
            .get_json(url, &format!("/blocks/range?start={start}&end={end}"))
            .await?;
        decode_blocks(url, views)
    }

    pub async fn fetch_mempool(&self, url: &str) -> Option<Vec<Transaction>> {
        let response: MempoolResponse = self.get_json(url, "/transaction_pool").await?;
        Some(
            response
                .transactions
                .into_iter()
                .map(|pooled| Transaction {
                    inputs: pooled.transaction.inputs,
                    outputs: pooled.transaction.outputs,
                    timestamp: pooled.transaction.timestamp,
                })
                .collect(),
        )
    }

    /// One discovery round: probe every known peer (plus bootstrap), merge
    /// their advertised peer lists, and refresh the node registry.
    pub async fn discover(&self, store: &LedgerStore) {
        let mut candidates = self.active_urls();
        for url in &self.config.node.bootstrap_peers {
            if !candidates.contains(url) {
                candidates.push(url.clone());
            }
        }
        for url in candidates {
            self.register(&url);
            let Some(status) = self.fetch_status(&url).await else {
                continue;
            };
            if let Err(e) = store.upsert_node(Some(status.node_id), &url).await {
                warn!(%url, "failed to record peer in registry: {e}");
            }
            if let Some(listing) = self.get_json::<PeersResponse>(&url, "/peers").await {
                for peer in listing.peers {
                    self.register(&peer.url);
                }
            }
        }
        debug!(
            known = self.peer_count(),
            active = self.active_count(),
            "discovery round complete"
        );
    }

    /// Concurrently push a block to every active peer except the origin.
    /// Fire-and-forget: failures only move health counters.
    pub fn broadcast_block(self: &Arc<Self>, block: &Block, skip: Option<String>) {
        let view = BlockView::from_block(block);
        for url in self.active_urls() {
            if Some(&url) == skip.as_ref() {
                continue;
            }
            let manager = Arc::clone(self);
            let body = SubmitBlockRequest {
                block: view.clone(),
                locally_mined: false,
                origin_url: Some(self.self_url().to_string()),
                stats: None,
            };
            tokio::spawn(async move {
                let Ok(_global) = manager.fanout.clone().acquire_owned().await else {
                    return;
                };
                let Some(per_peer) = manager.peer_inflight(&url) else {
                    return;
                };
                let Ok(_slot) = per_peer.acquire_owned().await else {
                    return;
                };
                manager.post_json(&url, "/submit_block", &body).await;
            });
        }
    }

    /// Concurrently push a transaction to every active peer except the
    /// origin.
    pub fn broadcast_transaction(self: &Arc<Self>, transaction: &Transaction, skip: Option<String>) {
        let body = ReceiveTransactionRequest {
            transaction: transaction.clone(),
            origin_url: Some(self.self_url().to_string()),
        };
        for url in self.active_urls() {
            if Some(&url) == skip.as_ref() {
                continue;
            }
            let manager = Arc::clone(self);
            let body = body.clone();
            tokio::spawn(async move {
                let Ok(_global) = manager.fanout.clone().acquire_owned().await else {
                    return;
                };
                let Some(per_peer) = manager.peer_inflight(&url) else {
                    return;
                };
                let Ok(_slot) = per_peer.acquire_owned().await else {
                    return;
                };
                manager.post_json(&url, "/receive_transaction", &body).await;
            });
        }
    }

    fn peer_inflight(&self, url: &str) -> Option<Arc<Semaphore>> {
        self.peers.get(url).map(|record| Arc::clone(&record.inflight))
    }
}

fn decode_blocks(url: &str, views: Vec<BlockView>) -> Option<Vec<Block>> {
    let mut blocks = Vec::with_capacity(views.len());
    for view in views {
        match view.into_block() {
            Ok(block) => blocks.push(block),
            Err(e) => {
                warn!(%url, "peer sent corrupt block: {e}");
                return None;
            }
        }
    }
    Some(blocks)
}

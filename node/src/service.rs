//! Node composition root.
//!
//! `NodeService` owns the ledger state and the single write-serialization
//! point. Every mutation (transaction admission, block append, chain
//! replacement) runs under one async mutex. Readers never touch that mutex;
//! they clone the published `Arc<ChainState>` snapshot, which is swapped
//! as the final step of each mutation. Persistence happens before the swap,
//! so a store failure leaves the in-memory ledger untouched.

use crate::store::{BalanceRow, LedgerStore, MiningStats, StoreError};
use chaincore::config::ChainConfig;
use chaincore::crypto::{Address, Hash};
use chaincore::difficulty;
use chaincore::error::{ChainError, Result};
use chaincore::types::{
    Block, BlockHeader, Chain, Mempool, OrphanPool, Transaction, UtxoDelta, UtxoIndex,
    UtxoSnapshot,
};
use chaincore::util::{Amount, MerkleRoot};
use chaincore::validation;
use chaincore::ORPHAN_CACHE_CAPACITY;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Immutable published view of the ledger. Cloning the `Arc` is the MVCC
/// snapshot operation; all inner collections are cheap to share.
#[derive(Clone)]
pub struct ChainState {
    pub chain: Chain,
    pub utxo: UtxoIndex,
    pub mempool: Mempool,
}

/// What happened to a submitted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Extended the tip.
    Appended,
    /// Triggered a chain replacement as part of a heavier fork.
    Replaced,
    /// Parent unknown; cached awaiting its ancestor.
    Orphaned,
}

/// Mining template handed to external miners. The template id commits to
/// `(previous_hash, merkle_root, target_difficulty)` so a submission can be
/// matched against the tip it was assembled on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub template_id: Hash,
    pub block: Block,
}

pub fn template_id(previous_hash: &Hash, merkle_root: &Hash, target_difficulty: u32) -> Hash {
    Hash::of_canonical(&serde_json::json!({
        "previous_hash": previous_hash,
        "merkle_root": merkle_root,
        "target_difficulty": target_difficulty,
    }))
}

pub struct NodeService {
    config: &'static ChainConfig,
    node_id: Uuid,
    started_at: Instant,
    store: LedgerStore,
    /// Published snapshot; the lock is held only to clone or swap the Arc.
    state: RwLock<Arc<ChainState>>,
    /// The write region: every ledger mutation serializes here.
    write_region: AsyncMutex<()>,
    orphans: Mutex<OrphanPool>,
    degraded: AtomicBool,
}

impl NodeService {
    /// Load persisted state (or bootstrap genesis into an empty store),
    /// rebuild the in-memory index, and refresh the balance cache.
    pub async fn start(
        config: &'static ChainConfig,
        store: LedgerStore,
    ) -> anyhow::Result<Arc<NodeService>> {
        let blocks = store.load_chain().await?;
        let (chain, utxo) = if blocks.is_empty() {
            info!("empty store, bootstrapping genesis");
            let (chain, utxo) = Chain::bootstrap();
            let genesis = Arc::clone(chain.tip());
            let mut scratch = UtxoIndex::new();
            let delta = scratch.apply_block(genesis.as_ref());
            let balances = balance_rows(
                &utxo.snapshot(),
                touched_addresses(genesis.as_ref(), &utxo.snapshot()),
                0,
            );
            store.append_block(genesis.as_ref(), &delta, &balances).await?;
            (chain, utxo)
        } else {
            info!(blocks = blocks.len(), "loading persisted chain");
            let (chain, utxo) = Chain::validate_candidate(blocks, &config.consensus)
                .map_err(|e| anyhow::anyhow!("persisted chain fails validation: {e}"))?;
            store.verify_tip(chain.height(), &chain.tip().hash()).await?;
            (chain, utxo)
        };
        store.rebuild_utxo_and_balances().await?;

        let mempool = Mempool::new(
            config.node.mempool_max_transactions,
            config.node.mempool_max_bytes,
        );
        let service = Arc::new(NodeService {
            config,
            node_id: Uuid::new_v4(),
            started_at: Instant::now(),
            store,
            state: RwLock::new(Arc::new(ChainState {
                chain,
                utxo,
                mempool,
            })),
            write_region: AsyncMutex::new(()),
            orphans: Mutex::new(OrphanPool::new(ORPHAN_CACHE_CAPACITY)),
            degraded: AtomicBool::new(false),
        });
        info!(
            node_id = %service.node_id,
            height = service.state().chain.height(),
            "node service ready"
        );
        Ok(service)
    }

    pub fn config(&self) -> &'static ChainConfig {
        self.config
    }

    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// MVCC read: the current published snapshot.
    pub fn state(&self) -> Arc<ChainState> {
        self.state.read().expect("BUG: state lock poisoned").clone()
    }

    fn publish(&self, next: ChainState) {
        *self.state.write().expect("BUG: state lock poisoned") = Arc::new(next);
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_degraded() {
            return Err(ChainError::consistency(
                "node degraded, refusing ledger writes",
            ));
        }
        Ok(())
    }

    pub fn orphan_blocks(&self) -> Vec<Block> {
        self.orphans
            .lock()
            .expect("BUG: orphan lock poisoned")
            .blocks()
            .cloned()
            .collect()
    }

    /// The difficulty the next block must declare.
    pub fn next_difficulty(&self) -> u32 {
        difficulty::expected_difficulty(&self.state().chain, &self.config.consensus)
    }

    /// Validate and admit a transaction to the mempool. Gossip is the
    /// caller's concern; admission is purely local.
    pub async fn admit_transaction(&self, tx: Transaction) -> Result<Hash> {
        let _region = self.write_region.lock().await;
        let cur = self.state();

        let tx_id = tx.id();
        if cur.mempool.contains(&tx_id) {
            return Err(ChainError::double_spend(format!(
                "transaction {tx_id} already pooled"
            )));
        }
        if cur.chain.contains_transaction(&tx_id) {
            return Err(ChainError::double_spend(format!(
                "transaction {tx_id} already confirmed"
            )));
        }
        let fee = validation::validate_transaction(&tx, &cur.utxo.snapshot(), cur.mempool.shadow())?;

        let mut next = (*cur).clone();
        next.mempool.insert(tx, fee)?;
        self.publish(next);
        debug!(%tx_id, %fee, "transaction admitted to mempool");
        Ok(tx_id)
    }

    /// Assemble a mining template on the current tip: prioritized mempool
    /// drain, coinbase paying reward plus fees, fresh header.
    pub async fn request_template(&self, miner: Address) -> Result<BlockTemplate> {
        let cur = self.state();
        let consensus = &self.config.consensus;

        let picked = cur
            .mempool
            .drain_prioritized(consensus.max_block_transactions.saturating_sub(1), usize::MAX);
        let fees = Amount::checked_sum(picked.iter().map(|(_, _, fee)| *fee))
            .ok_or_else(|| ChainError::AmountOverflow("template fee sum overflows".into()))?;

        let tip = cur.chain.tip();
        let timestamp = Utc::now().max(tip.header.timestamp + Duration::seconds(1));
        let reward = consensus
            .block_reward
            .checked_add(fees)
            .ok_or_else(|| ChainError::AmountOverflow("coinbase sum overflows".into()))?;
        let coinbase = Transaction::coinbase(miner, reward, timestamp);

        let mut transactions = vec![coinbase];
        transactions.extend(picked.iter().map(|(_, tx, _)| (**tx).clone()));
        let merkle_root = MerkleRoot::calculate(&transactions);
        let target_difficulty = difficulty::expected_difficulty(&cur.chain, consensus);

        let header = BlockHeader::new(
            tip.header.index + 1,
            tip.hash(),
            merkle_root,
            timestamp,
            0,
            target_difficulty,
        );
        let id = template_id(&header.previous_hash, &merkle_root.as_hash(), target_difficulty);
        debug!(template_id = %id, height = header.index, txs = transactions.len(), "template assembled");
        Ok(BlockTemplate {
            template_id: id,
            block: Block::new(header, transactions),
        })
    }

    /// Validate and append a submitted block, or route it through fork
    /// resolution when it does not extend the tip. Concurrent submissions
    /// serialize; losers see `stale_template`.
    pub async fn submit_block(
        &self,
        block: Block,
        locally_mined: bool,
        stats: Option<MiningStats>,
    ) -> Result<SubmitOutcome> {
        let _region = self.write_region.lock().await;
        self.ensure_writable()?;
        let cur = self.state();

        if block.header.previous_hash != cur.chain.tip().hash() {
            return self.try_adopt_fork(block, cur, locally_mined).await;
        }

        let mut next = (*cur).clone();
        let delta = next
            .chain
            .append(block.clone(), &mut next.utxo, &self.config.consensus)?;
        let confirmed = validation::block_tx_ids(&block);
        next.mempool.remove_confirmed(&confirmed);

        let touched = touched_addresses(&block, &cur.utxo.snapshot());
        let balances = balance_rows(&next.utxo.snapshot(), touched, block.header.index);
        self.persist_append(&block, &delta, &balances).await?;

        self.publish(next);
        self.prune_orphans();

        let height = block.header.index;
        info!(height, hash = %block.hash(), locally_mined, "block appended");
        if locally_mined {
            let stats = stats.unwrap_or_default();
            if let Err(e) = self
                .store
                .record_mining_stats(self.node_id, height, &stats)
                .await
            {
                warn!("failed to record mining stats: {e}");
            }
        }
        Ok(SubmitOutcome::Appended)
    }

    /// Feed a full candidate chain (from a peer) into fork resolution.
    /// Returns true when the local chain was replaced.
    pub async fn adopt_remote_chain(&self, blocks: Vec<Block>) -> Result<bool> {
        let _region = self.write_region.lock().await;
        self.ensure_writable()?;
        let cur = self.state();

        let (candidate, rebuilt) = Chain::validate_candidate(blocks, &self.config.consensus)?;
        if candidate.cumulative_work() <= cur.chain.cumulative_work() {
            debug!("remote chain not heavier, keeping local chain");
            return Ok(false);
        }
        self.apply_replacement(cur, candidate, rebuilt).await?;
        Ok(true)
    }

    /// Orphan/alternative-chain handling for a block that does not extend
    /// the tip (spec'd fork-resolution path).
    async fn try_adopt_fork(
        &self,
        block: Block,
        cur: Arc<ChainState>,
        locally_mined: bool,
    ) -> Result<SubmitOutcome> {
        // Structural gate before caching: the header must at least satisfy
        // its own declared target, or the cache could be flooded for free.
        if !block.hash().matches_target(block.header.target()) {
            return Err(ChainError::BadPow(format!(
                "hash {} does not meet declared difficulty {}",
                block.hash(),
                block.header.target_difficulty
            )));
        }

        let candidate_blocks = {
            let mut orphans = self.orphans.lock().expect("BUG: orphan lock poisoned");
            orphans.insert(block.clone());
            orphans.assemble_candidate(&block, &cur.chain)
        };

        let Some(blocks) = candidate_blocks else {
            if locally_mined {
                return Err(ChainError::StaleTemplate(
                    "tip moved past the submitted template".into(),
                ));
            }
            debug!(hash = %block.hash(), "cached orphan block awaiting ancestor");
            return Ok(SubmitOutcome::Orphaned);
        };

        let (candidate, rebuilt) = Chain::validate_candidate(blocks, &self.config.consensus)?;
        if candidate.cumulative_work() <= cur.chain.cumulative_work() {
            return Err(ChainError::StaleTemplate(
                "candidate chain is not heavier than the local chain".into(),
            ));
        }
        self.apply_replacement(cur, candidate, rebuilt).await?;
        Ok(SubmitOutcome::Replaced)
    }

    /// Atomic chain replacement: rewrite the store, re-admit transactions
    /// from discarded blocks that remain valid under the new tip, refresh
    /// the balance cache (mandatory), then publish the new state.
    async fn apply_replacement(
        &self,
        cur: Arc<ChainState>,
        candidate: Chain,
        new_utxo: UtxoIndex,
    ) -> Result<()> {
        let snapshot = new_utxo.snapshot();
        let mut mempool = Mempool::new(
            self.config.node.mempool_max_transactions,
            self.config.node.mempool_max_bytes,
        );

        // Transactions from discarded blocks, then the old pool; anything
        // already on the candidate or now invalid is dropped silently.
        let fork_height = first_divergence(&cur.chain, &candidate);
        let discarded = cur
            .chain
            .blocks()
            .skip(fork_height)
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| !tx.is_coinbase())
            .cloned();
        let pooled = cur
            .mempool
            .entries()
            .map(|entry| (*entry.transaction).clone());
        let mut readmitted = 0usize;
        for tx in discarded.chain(pooled) {
            let tx_id = tx.id();
            if candidate.contains_transaction(&tx_id) || mempool.contains(&tx_id) {
                continue;
            }
            if let Ok(fee) = validation::validate_transaction(&tx, &snapshot, mempool.shadow()) {
                if mempool.insert(tx, fee).is_ok() {
                    readmitted += 1;
                }
            }
        }

        // The store rewrite includes the mandatory balance-cache refresh.
        match self.store.replace_chain(&candidate.to_blocks()).await {
            Ok(()) => {}
            Err(e) => return Err(self.store_failure(e)),
        }

        let old_height = cur.chain.height();
        let mut next = (*cur).clone();
        if !next.chain.replace(candidate) {
            // Raced by definition impossible: we hold the write region
            return Err(ChainError::consistency(
                "replacement candidate no longer heavier",
            ));
        }
        next.utxo = new_utxo;
        next.mempool = mempool;
        self.publish(next);
        self.prune_orphans();
        info!(
            old_height,
            new_height = self.state().chain.height(),
            readmitted,
            "chain replaced by heavier fork"
        );
        Ok(())
    }

    async fn persist_append(
        &self,
        block: &Block,
        delta: &UtxoDelta,
        balances: &[BalanceRow],
    ) -> Result<()> {
        self.store
            .append_block(block, delta, balances)
            .await
            .map_err(|e| self.store_failure(e))
    }

    /// Store failures split two ways: an unavailable database degrades the
    /// node (reads continue, writes refuse); a detected consistency
    /// violation is fatal and the process exits non-zero.
    fn store_failure(&self, e: StoreError) -> ChainError {
        match e {
            StoreError::Db(e) => {
                self.degraded.store(true, Ordering::Relaxed);
                error!("store unavailable, node degraded: {e}");
                ChainError::consistency(format!("store unavailable: {e}"))
            }
            StoreError::Consistency(msg) => {
                error!("fatal ledger consistency violation: {msg}");
                std::process::exit(1);
            }
            StoreError::Codec(index) => {
                error!("fatal: corrupt block data at index {index}");
                std::process::exit(1);
            }
        }
    }

    fn prune_orphans(&self) {
        let state = self.state();
        self.orphans
            .lock()
            .expect("BUG: orphan lock poisoned")
            .prune_connected(&state.chain);
    }

    /// Historical transactions involving an address, oldest first.
    pub fn transactions_for_address(&self, address: &Address) -> Vec<(u64, Transaction)> {
        let state = self.state();
        let mut found = Vec::new();
        for block in state.chain.blocks() {
            for tx in &block.transactions {
                let receives = tx.pays(address);
                let spends = tx
                    .inputs
                    .iter()
                    .any(|input| &input.pubkey.address() == address);
                if receives || spends {
                    found.push((block.header.index, tx.clone()));
                }
            }
        }
        found
    }
}

/// Every address whose balance a block changes: recipients of created
/// outputs plus owners of spent ones (resolved against the pre-block
/// snapshot).
fn touched_addresses(block: &Block, before: &UtxoSnapshot) -> HashSet<Address> {
    let mut touched = HashSet::new();
    for tx in &block.transactions {
        for output in &tx.outputs {
            touched.insert(output.recipient_address.clone());
        }
        for input in &tx.inputs {
            let outpoint =
                chaincore::types::OutPoint::new(input.prev_tx_id, input.prev_output_index);
            if let Some(utxo) = before.get(&outpoint) {
                touched.insert(utxo.recipient_address.clone());
            }
        }
    }
    touched
}

/// Balance-cache rows for the touched addresses, computed from the
/// post-block snapshot.
fn balance_rows(
    after: &UtxoSnapshot,
    touched: HashSet<Address>,
    block_index: u64,
) -> Vec<BalanceRow> {
    touched
        .into_iter()
        .map(|address| {
            let utxos = after.utxos_for(&address);
            BalanceRow {
                balance: after.balance_of(&address),
                utxo_count: utxos.len() as u64,
                last_activity_block: block_index,
                address,
            }
        })
        .collect()
}

/// Index of the first block where two chains disagree.
fn first_divergence(a: &Chain, b: &Chain) -> usize {
    let mut index = 0usize;
    loop {
        match (a.get(index as u64), b.get(index as u64)) {
            (Some(x), Some(y)) if x.hash() == y.hash() => index += 1,
            _ => return index,
        }
    }
}

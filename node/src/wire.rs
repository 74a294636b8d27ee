//! JSON wire types shared by the HTTP handlers and the peer client.
//!
//! Blocks travel as a flat view (header fields plus declared hash); the
//! receiving side rebuilds the domain type and verifies the declared hash
//! against the recomputed one, so a corrupted relay is caught at the edge.

use crate::store::MiningStats;
use chaincore::crypto::{Address, Hash};
use chaincore::error::{ChainError, Result};
use chaincore::types::{
    Block, BlockHeader, Transaction, TransactionInput, TransactionOutput,
};
use chaincore::util::{Amount, MerkleRoot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct StatusResponse {
    pub node_id: Uuid,
    pub chain_length: u64,
    pub tip_hash: Hash,
    pub target_difficulty: u32,
    /// Decimal string: the 256-bit work sum exceeds every native integer.
    pub cumulative_work: String,
    pub active_peers: usize,
    pub pending_tx_count: usize,
    pub uptime_s: u64,
    pub degraded: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TxView {
    pub tx_id: Hash,
    pub is_coinbase: bool,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub timestamp: DateTime<Utc>,
}

impl TxView {
    pub fn from_tx(tx: &Transaction) -> Self {
        TxView {
            tx_id: tx.id(),
            is_coinbase: tx.is_coinbase(),
            inputs: tx.inputs.clone(),
            outputs: tx.outputs.clone(),
            timestamp: tx.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BlockView {
    pub index: u64,
    pub hash: Hash,
    pub previous_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub target_difficulty: u32,
    pub transactions: Vec<TxView>,
}

impl BlockView {
    pub fn from_block(block: &Block) -> Self {
        BlockView {
            index: block.header.index,
            hash: block.hash(),
            previous_hash: block.header.previous_hash,
            merkle_root: block.header.merkle_root.as_hash(),
            timestamp: block.header.timestamp,
            nonce: block.header.nonce,
            target_difficulty: block.header.target_difficulty,
            transactions: block.transactions.iter().map(TxView::from_tx).collect(),
        }
    }

    /// Rebuild the domain block and verify the declared hash.
    pub fn into_block(self) -> Result<Block> {
        let transactions: Vec<Transaction> = self
            .transactions
            .into_iter()
            .map(|view| Transaction {
                inputs: view.inputs,
                outputs: view.outputs,
                timestamp: view.timestamp,
            })
            .collect();
        let merkle_root = MerkleRoot::calculate(&transactions);
        let block = Block::new(
            BlockHeader::new(
                self.index,
                self.previous_hash,
                merkle_root,
                self.timestamp,
                self.nonce,
                self.target_difficulty,
            ),
            transactions,
        );
        // Declared merkle root and hash must match what the content implies
        if merkle_root.as_hash() != self.merkle_root {
            return Err(ChainError::BadMerkle);
        }
        if block.hash() != self.hash {
            return Err(ChainError::malformed(format!(
                "declared hash {} does not match content hash {}",
                self.hash,
                block.hash()
            )));
        }
        Ok(block)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChainResponse {
    pub length: u64,
    pub chain: Vec<BlockView>,
}

/// `submit_block` request: a miner submission (`locally_mined` true, the
/// default) or a peer relay (`origin_url` set, never re-broadcast back).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubmitBlockRequest {
    pub block: BlockView,
    #[serde(default = "default_true")]
    pub locally_mined: bool,
    #[serde(default)]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub stats: Option<MiningStats>,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SubmitBlockResponse {
    pub accepted: bool,
    pub outcome: crate::service::SubmitOutcome,
    pub chain_length: u64,
}

/// Peer-relayed transaction; `origin_url` breaks gossip loops.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReceiveTransactionRequest {
    pub transaction: Transaction,
    #[serde(default)]
    pub origin_url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AdmitResponse {
    pub accepted: bool,
    pub tx_id: Hash,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TemplateRequest {
    pub miner_address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BalanceResponse {
    pub address: Address,
    pub balance: Amount,
    pub utxo_count: u64,
    pub last_activity_block: u64,
    /// `"cache"` from the balance table, `"utxo_fallback"` for addresses
    /// the cache has never seen.
    pub source: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UtxoView {
    pub tx_id: Hash,
    pub output_index: u32,
    pub amount: Amount,
    pub recipient_address: Address,
    pub block_height: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UtxoListResponse {
    pub address: Address,
    pub utxos: Vec<UtxoView>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AddressTransaction {
    pub block_index: u64,
    #[serde(flatten)]
    pub transaction: TxView,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AddressTransactionsResponse {
    pub address: Address,
    pub transactions: Vec<AddressTransaction>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PooledTransaction {
    pub fee: Amount,
    pub size_bytes: usize,
    pub admitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub transaction: TxView,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MempoolResponse {
    pub count: usize,
    pub total_bytes: usize,
    pub transactions: Vec<PooledTransaction>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PeerInfo {
    pub url: String,
    pub last_probe_ok: bool,
    pub last_probe_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub active: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
    pub active_peers: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrphansResponse {
    pub count: usize,
    pub blocks: Vec<BlockView>,
}

/// Machine-readable rejection, mirrored for every endpoint.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RejectResponse {
    pub accepted: bool,
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaincore::types::Chain;

    #[test]
    fn block_view_round_trips() {
        let (chain, _) = Chain::bootstrap();
        let block = chain.tip().as_ref().clone();
        let view = BlockView::from_block(&block);
        let rebuilt = view.into_block().unwrap();
        assert_eq!(rebuilt, block);
    }

    #[test]
    fn corrupted_relay_is_rejected() {
        let (chain, _) = Chain::bootstrap();
        let block = chain.tip().as_ref().clone();
        let mut view = BlockView::from_block(&block);
        view.nonce = view.nonce.wrapping_add(1);
        assert!(view.into_block().is_err());
    }

    #[test]
    fn submit_request_defaults_to_locally_mined() {
        let (chain, _) = Chain::bootstrap();
        let view = BlockView::from_block(chain.tip().as_ref());
        let json = serde_json::json!({ "block": view });
        let request: SubmitBlockRequest = serde_json::from_value(json).unwrap();
        assert!(request.locally_mined);
        assert!(request.origin_url.is_none());
    }
}

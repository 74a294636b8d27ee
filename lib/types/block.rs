use super::Transaction;
use crate::crypto::{Address, Hash};
use crate::util::MerkleRoot;
use crate::{MAX_TARGET, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BlockHeader {
    /// Height, 0-based. Block 0 is the genesis block.
    pub index: u64,
    pub previous_hash: Hash,
    pub merkle_root: MerkleRoot,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    /// Difficulty in bits; the implied target is `MAX_TARGET >> bits`.
    pub target_difficulty: u32,
}

impl BlockHeader {
    pub fn new(
        index: u64,
        previous_hash: Hash,
        merkle_root: MerkleRoot,
        timestamp: DateTime<Utc>,
        nonce: u64,
        target_difficulty: u32,
    ) -> Self {
        BlockHeader {
            index,
            previous_hash,
            merkle_root,
            timestamp,
            nonce,
            target_difficulty,
        }
    }

    /// Canonical header form hashed for block identity: JSON with sorted
    /// keys over `{index, merkle_root, nonce, previous_hash,
    /// target_difficulty, timestamp}`.
    pub fn canonical_json(&self) -> String {
        json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "merkle_root": self.merkle_root.as_hash(),
            "timestamp": self.timestamp.timestamp(),
            "nonce": self.nonce,
            "target_difficulty": self.target_difficulty,
        })
        .to_string()
    }

    pub fn hash(&self) -> Hash {
        Hash::double_sha256(self.canonical_json().as_bytes())
    }

    /// The numeric bound this header's hash must stay below.
    pub fn target(&self) -> U256 {
        MAX_TARGET >> self.target_difficulty.min(255)
    }

    /// Chain-selection weight: `2^difficulty`, the expected number of hash
    /// attempts behind this block.
    pub fn work(&self) -> U256 {
        U256::one() << self.target_difficulty.min(255)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    /// `transactions[0]` is the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// The address the coinbase pays, recorded alongside the block row.
    pub fn miner_address(&self) -> Option<&Address> {
        self.coinbase()
            .and_then(|tx| tx.outputs.first())
            .map(|output| &output.recipient_address)
    }
}

//! # ChainCore core ledger library
//!
//! This crate implements the ledger state engine of a proof-of-work UTXO
//! cryptocurrency: transactions, blocks, the chain with fork resolution,
//! the in-memory UTXO index with MVCC snapshots, the mempool, validation,
//! and difficulty control. It performs no network or database I/O; the
//! `chaincore-node` crate composes these pieces into a running node.

use serde::{Deserialize, Serialize};
use uint::construct_uint;
construct_uint! {
    // Construct an unsigned 256-bit integer
    // consisting of 4 x 64-bit words
    #[derive(Deserialize, Serialize)]
    pub struct U256(4);
}

/// The easiest possible target. A block with difficulty `d` must hash
/// numerically below `MAX_TARGET >> d`.
pub const MAX_TARGET: U256 = U256([
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
    0xFFFF_FFFF_FFFF_FFFF,
]);

/// Base units per whole coin. Amounts carry 8 fractional digits.
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Default block reward in whole coins.
pub const DEFAULT_BLOCK_REWARD: u64 = 50;

/// Default baseline difficulty in bits.
pub const DEFAULT_DIFFICULTY: u32 = 1;

/// Default target seconds between blocks.
pub const DEFAULT_TARGET_BLOCK_TIME: u64 = 10;

/// Default number of blocks between difficulty adjustments.
pub const DEFAULT_ADJUSTMENT_INTERVAL: u64 = 10;

/// Default per-adjustment difficulty step clamp, in difficulty units.
pub const DEFAULT_MAX_DIFFICULTY_CHANGE: u32 = 4;

/// Default maximum number of transactions per block, coinbase included.
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 20;

/// Orphan blocks kept while waiting for their ancestors, LRU-evicted.
pub const ORPHAN_CACHE_CAPACITY: usize = 100;

pub mod config;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod genesis;
pub mod util;
pub mod validation;

#[cfg(test)]
pub mod test_helpers;

#[path = "../types/mod.rs"]
pub mod types;

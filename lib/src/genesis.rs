//! The hardcoded genesis block.
//!
//! Block 0 is identical on every node: fixed timestamp, nonce 0, difficulty
//! 2, a single coinbase paying the initial reward to the burn address (no
//! known private key). Nodes validate block 0 by identity against this
//! constant; the numeric proof-of-work check never applies to it.

use crate::crypto::{Address, Hash};
use crate::types::{Block, BlockHeader, Transaction};
use crate::util::{Amount, MerkleRoot};
use chrono::{DateTime, Utc};

pub const GENESIS_TIMESTAMP_SECS: i64 = 1_700_000_000;
pub const GENESIS_DIFFICULTY: u32 = 2;
pub const GENESIS_REWARD_COINS: u64 = 50;

/// Version-0 address over a 20-zero-byte payload; nobody holds its key.
pub fn genesis_address() -> Address {
    Address::from_payload([0u8; 20])
}

pub fn genesis_block() -> Block {
    let timestamp: DateTime<Utc> = DateTime::from_timestamp(GENESIS_TIMESTAMP_SECS, 0)
        .expect("BUG: genesis timestamp is a valid instant");
    let coinbase = Transaction::coinbase(
        genesis_address(),
        Amount::from_coins(GENESIS_REWARD_COINS),
        timestamp,
    );
    let merkle_root = MerkleRoot::calculate(std::slice::from_ref(&coinbase));
    Block::new(
        BlockHeader::new(0, Hash::zero(), merkle_root, timestamp, 0, GENESIS_DIFFICULTY),
        vec![coinbase],
    )
}

pub fn genesis_hash() -> Hash {
    genesis_block().hash()
}

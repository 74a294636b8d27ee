//! Shared test helper functions for unit tests
//!
//! This module provides reusable test utilities to avoid duplication
//! across test modules in the codebase.

use crate::config::{ChainConfig, ConsensusConfig};
use crate::crypto::{Address, PrivateKey};
use crate::difficulty;
use crate::types::{Block, BlockHeader, Chain, Transaction, UtxoIndex};
use crate::util::{Amount, MerkleRoot};
use chrono::{Duration, Utc};

/// Consensus parameters for tests: easiest difficulty, retargeting off, so
/// mining a block takes a couple of nonce attempts.
pub fn test_consensus() -> ConsensusConfig {
    ConsensusConfig {
        difficulty: 1,
        adjustment_enabled: false,
        ..ConsensusConfig::default()
    }
}

pub fn test_config() -> ChainConfig {
    ChainConfig {
        consensus: test_consensus(),
        ..ChainConfig::default()
    }
}

pub fn test_address() -> Address {
    PrivateKey::new_key().public_key().address()
}

/// Assemble and mine a block on `chain`'s tip: coinbase paying
/// `reward + fees` to `miner`, then the given transactions, then a nonce
/// search until the header meets its target.
pub fn mine_block(
    chain: &Chain,
    utxo: &UtxoIndex,
    cfg: &ConsensusConfig,
    miner: &Address,
    transactions: Vec<Transaction>,
) -> Block {
    let snapshot = utxo.snapshot();
    let mut fees = Amount::ZERO;
    for tx in &transactions {
        let inputs = Amount::checked_sum(tx.inputs.iter().map(|input| {
            snapshot
                .get(&crate::types::OutPoint::new(
                    input.prev_tx_id,
                    input.prev_output_index,
                ))
                .expect("test transaction spends a known UTXO")
                .amount
        }))
        .expect("test input sum fits");
        let outputs = tx.total_output().expect("test output sum fits");
        fees = fees
            .checked_add(inputs.checked_sub(outputs).expect("test fee non-negative"))
            .expect("test fee sum fits");
    }

    let tip = chain.tip();
    let timestamp = Utc::now().max(tip.header.timestamp + Duration::seconds(1));
    let coinbase = Transaction::coinbase(
        miner.clone(),
        cfg.block_reward.checked_add(fees).expect("reward fits"),
        timestamp,
    );
    let mut block_transactions = vec![coinbase];
    block_transactions.extend(transactions);

    let mut block = Block::new(
        BlockHeader::new(
            tip.header.index + 1,
            tip.hash(),
            MerkleRoot::calculate(&block_transactions),
            timestamp,
            0,
            difficulty::expected_difficulty(chain, cfg),
        ),
        block_transactions,
    );
    let target = block.header.target();
    while !block.hash().matches_target(target) {
        block.header.nonce += 1;
    }
    block
}

/// Mine and append `count` empty blocks paying `miner`.
pub fn extend_chain(
    chain: &mut Chain,
    utxo: &mut UtxoIndex,
    cfg: &ConsensusConfig,
    miner: &Address,
    count: usize,
) {
    for _ in 0..count {
        let block = mine_block(chain, utxo, cfg, miner, vec![]);
        chain
            .append(block, utxo, cfg)
            .expect("mined test block is valid");
    }
}

//! Stateless validation predicates over blocks and transactions.
//!
//! Everything here is pure: callers hand in a UTXO view and get back either
//! `Ok` (with the fee / fee total) or the precise rejection reason. The
//! write-serialized caller decides what to do with the verdict.

use crate::config::ConsensusConfig;
use crate::crypto::Hash;
use crate::error::{ChainError, Result};
use crate::types::{Block, OutPoint, Transaction, Utxo, UtxoSnapshot};
use crate::util::Amount;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};

/// Maximum tolerated clock skew for incoming block timestamps.
pub const MAX_FUTURE_DRIFT_SECS: i64 = 2 * 60 * 60;

/// Read access to a UTXO state, either a plain snapshot or a block overlay.
pub trait UtxoLookup {
    fn lookup(&self, outpoint: &OutPoint) -> Option<&Utxo>;

    /// True when the outpoint existed but was consumed earlier in the same
    /// validation pass; distinguishes `double_spend` from `unknown_input`.
    fn already_spent(&self, _outpoint: &OutPoint) -> bool {
        false
    }
}

impl UtxoLookup for UtxoSnapshot {
    fn lookup(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.get(outpoint)
    }
}

/// Snapshot plus the effects of earlier transactions in the block being
/// validated; makes intra-block spends visible in order.
pub struct BlockOverlay<'a> {
    base: &'a UtxoSnapshot,
    added: HashMap<OutPoint, Utxo>,
    spent: HashSet<OutPoint>,
}

impl<'a> BlockOverlay<'a> {
    pub fn new(base: &'a UtxoSnapshot) -> Self {
        BlockOverlay {
            base,
            added: HashMap::new(),
            spent: HashSet::new(),
        }
    }

    /// Fold a validated transaction's effects into the overlay.
    pub fn apply(&mut self, tx: &Transaction, block_height: u64) {
        let tx_id = tx.id();
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_tx_id, input.prev_output_index);
            self.added.remove(&outpoint);
            self.spent.insert(outpoint);
        }
        for (output_index, output) in tx.outputs.iter().enumerate() {
            self.added.insert(
                OutPoint::new(tx_id, output_index as u32),
                Utxo {
                    amount: output.amount,
                    recipient_address: output.recipient_address.clone(),
                    block_height,
                },
            );
        }
    }
}

impl UtxoLookup for BlockOverlay<'_> {
    fn lookup(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        if self.spent.contains(outpoint) {
            return None;
        }
        self.added.get(outpoint).or_else(|| self.base.get(outpoint))
    }

    fn already_spent(&self, outpoint: &OutPoint) -> bool {
        self.spent.contains(outpoint)
    }
}

/// Validate a non-coinbase transaction against a UTXO view and the set of
/// outpoints already reserved by the mempool. Returns the fee.
pub fn validate_transaction<L: UtxoLookup>(
    tx: &Transaction,
    utxos: &L,
    pool_shadow: &HashSet<OutPoint>,
) -> Result<Amount> {
    if tx.inputs.is_empty() {
        return Err(ChainError::malformed("transaction has no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(ChainError::malformed("transaction has no outputs"));
    }

    let output_sum = tx
        .total_output()
        .ok_or_else(|| ChainError::AmountOverflow("output sum overflows".into()))?;

    let message = tx.signing_hash();
    let mut seen: HashSet<OutPoint> = HashSet::new();
    let mut input_sum = Amount::ZERO;
    for input in &tx.inputs {
        let outpoint = OutPoint::new(input.prev_tx_id, input.prev_output_index);
        if !seen.insert(outpoint) {
            return Err(ChainError::double_spend(format!(
                "outpoint {outpoint} referenced twice"
            )));
        }
        if utxos.already_spent(&outpoint) {
            return Err(ChainError::double_spend(format!(
                "outpoint {outpoint} already spent"
            )));
        }
        if pool_shadow.contains(&outpoint) {
            return Err(ChainError::double_spend(format!(
                "outpoint {outpoint} reserved by a pooled transaction"
            )));
        }
        let utxo = utxos.lookup(&outpoint).ok_or_else(|| {
            ChainError::unknown_input(format!("no unspent output {outpoint}"))
        })?;
        if input.pubkey.address() != utxo.recipient_address {
            return Err(ChainError::SignatureInvalid(format!(
                "pubkey does not own {outpoint}"
            )));
        }
        if !input.signature.verify(&message, &input.pubkey) {
            return Err(ChainError::SignatureInvalid(format!(
                "bad signature over {outpoint}"
            )));
        }
        input_sum = input_sum
            .checked_add(utxo.amount)
            .ok_or_else(|| ChainError::AmountOverflow("input sum overflows".into()))?;
    }

    input_sum
        .checked_sub(output_sum)
        .ok_or_else(|| ChainError::NegativeFee(format!(
            "inputs {input_sum} below outputs {output_sum}"
        )))
}

/// Validate a block against the prior tip and a UTXO snapshot taken at that
/// tip. Returns the total fees collected by the coinbase.
///
/// `expected_difficulty` is what the deterministic retarget schedule
/// requires at this height; a block declaring anything else fails PoW.
pub fn validate_block(
    block: &Block,
    prior_tip: &Block,
    snapshot: &UtxoSnapshot,
    cfg: &ConsensusConfig,
    expected_difficulty: u32,
) -> Result<Amount> {
    let header = &block.header;
    if header.index != prior_tip.header.index + 1 {
        return Err(ChainError::BadIndex(format!(
            "got {}, tip is {}",
            header.index, prior_tip.header.index
        )));
    }
    if header.previous_hash != prior_tip.hash() {
        return Err(ChainError::BadPrevHash(format!(
            "block links {}, tip is {}",
            header.previous_hash,
            prior_tip.hash()
        )));
    }
    if header.target_difficulty != expected_difficulty {
        return Err(ChainError::BadPow(format!(
            "declared difficulty {}, schedule requires {expected_difficulty}",
            header.target_difficulty
        )));
    }
    if !block.hash().matches_target(header.target()) {
        return Err(ChainError::BadPow(format!(
            "hash {} does not meet difficulty {}",
            block.hash(),
            header.target_difficulty
        )));
    }
    if header.timestamp <= prior_tip.header.timestamp {
        return Err(ChainError::TimestampOutOfRange(
            "not after parent timestamp".into(),
        ));
    }
    if header.timestamp > Utc::now() + Duration::seconds(MAX_FUTURE_DRIFT_SECS) {
        return Err(ChainError::TimestampOutOfRange(
            "too far in the future".into(),
        ));
    }
    if block.transactions.len() > cfg.max_block_transactions {
        return Err(ChainError::TooLarge(format!(
            "{} transactions, cap is {}",
            block.transactions.len(),
            cfg.max_block_transactions
        )));
    }
    if crate::util::MerkleRoot::calculate(&block.transactions) != header.merkle_root {
        return Err(ChainError::BadMerkle);
    }

    let coinbase = match block.transactions.first() {
        Some(tx) if tx.is_coinbase() => tx,
        Some(_) => return Err(ChainError::bad_coinbase("first transaction has inputs")),
        None => return Err(ChainError::bad_coinbase("block has no transactions")),
    };
    if coinbase.outputs.len() != 1 {
        return Err(ChainError::bad_coinbase(format!(
            "coinbase must have exactly one output, got {}",
            coinbase.outputs.len()
        )));
    }

    // Apply the coinbase first, then each transaction in order, so a
    // transaction may spend outputs produced earlier in this same block.
    let mut overlay = BlockOverlay::new(snapshot);
    overlay.apply(coinbase, header.index);

    let empty_shadow = HashSet::new();
    let mut fees = Amount::ZERO;
    for tx in &block.transactions[1..] {
        let fee = validate_transaction(tx, &overlay, &empty_shadow)
            .map_err(|e| ChainError::TxInvalid(Box::new(e)))?;
        fees = fees
            .checked_add(fee)
            .ok_or_else(|| ChainError::AmountOverflow("block fee sum overflows".into()))?;
        overlay.apply(tx, header.index);
    }

    let expected_coinbase = cfg
        .block_reward
        .checked_add(fees)
        .ok_or_else(|| ChainError::AmountOverflow("coinbase sum overflows".into()))?;
    if coinbase.outputs[0].amount != expected_coinbase {
        return Err(ChainError::bad_coinbase(format!(
            "pays {}, reward + fees is {expected_coinbase}",
            coinbase.outputs[0].amount
        )));
    }

    Ok(fees)
}

/// Ids of every transaction in a block, coinbase included.
pub fn block_tx_ids(block: &Block) -> Vec<Hash> {
    block.transactions.iter().map(|tx| tx.id()).collect()
}

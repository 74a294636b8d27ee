use super::{OutPoint, Transaction};
use crate::crypto::Hash;
use crate::error::{ChainError, Result};
use crate::util::Amount;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub transaction: Arc<Transaction>,
    pub fee: Amount,
    pub size_bytes: usize,
    pub admitted_at: DateTime<Utc>,
}

impl PoolEntry {
    /// Fee-per-byte in base units, scaled to keep integer precision.
    fn fee_rate(&self) -> u128 {
        if self.size_bytes == 0 {
            return 0;
        }
        (self.fee.units() as u128 * 1_000_000) / self.size_bytes as u128
    }
}

/// Validated, not-yet-confirmed transactions, deduplicated by tx id.
///
/// A transaction spending an outpoint already reserved by a pooled
/// transaction is rejected (`double_spend`): the earlier arrival wins.
/// Capacity is bounded by count and total byte size; past either limit
/// admission fails with a retry-later reason.
#[derive(Clone, Debug)]
pub struct Mempool {
    entries: HashMap<Hash, PoolEntry>,
    /// Outpoints reserved by pooled transactions.
    spent_outpoints: HashSet<OutPoint>,
    total_bytes: usize,
    max_count: usize,
    max_bytes: usize,
}

impl Mempool {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Mempool {
            entries: HashMap::new(),
            spent_outpoints: HashSet::new(),
            total_bytes: 0,
            max_count,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, tx_id: &Hash) -> bool {
        self.entries.contains_key(tx_id)
    }

    /// The outpoints reserved by pooled transactions; admission validation
    /// checks candidate inputs against this shadow.
    pub fn shadow(&self) -> &HashSet<OutPoint> {
        &self.spent_outpoints
    }

    pub fn entries(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.values()
    }

    pub fn get(&self, tx_id: &Hash) -> Option<&PoolEntry> {
        self.entries.get(tx_id)
    }

    /// Insert an already-validated transaction. The caller has verified it
    /// against a UTXO snapshot and this pool's shadow; this enforces only
    /// dedup, conflicts, and capacity.
    pub fn insert(&mut self, transaction: Transaction, fee: Amount) -> Result<Hash> {
        let tx_id = transaction.id();
        if self.entries.contains_key(&tx_id) {
            return Err(ChainError::double_spend(format!(
                "transaction {tx_id} already pooled"
            )));
        }
        for input in &transaction.inputs {
            let outpoint = OutPoint::new(input.prev_tx_id, input.prev_output_index);
            if self.spent_outpoints.contains(&outpoint) {
                return Err(ChainError::double_spend(format!(
                    "outpoint {outpoint} already reserved by a pooled transaction"
                )));
            }
        }
        let size_bytes = transaction.byte_size();
        if self.entries.len() >= self.max_count {
            return Err(ChainError::MempoolFull(format!(
                "{} transactions pooled, retry later",
                self.entries.len()
            )));
        }
        if self.total_bytes + size_bytes > self.max_bytes {
            return Err(ChainError::MempoolFull(format!(
                "{} bytes pooled, retry later",
                self.total_bytes
            )));
        }

        for input in &transaction.inputs {
            self.spent_outpoints
                .insert(OutPoint::new(input.prev_tx_id, input.prev_output_index));
        }
        self.total_bytes += size_bytes;
        self.entries.insert(
            tx_id,
            PoolEntry {
                transaction: Arc::new(transaction),
                fee,
                size_bytes,
                admitted_at: Utc::now(),
            },
        );
        Ok(tx_id)
    }

    /// Drop transactions confirmed by an appended block and release their
    /// reserved outpoints.
    pub fn remove_confirmed(&mut self, tx_ids: &[Hash]) {
        for tx_id in tx_ids {
            if let Some(entry) = self.entries.remove(tx_id) {
                self.total_bytes -= entry.size_bytes;
                for input in &entry.transaction.inputs {
                    self.spent_outpoints
                        .remove(&OutPoint::new(input.prev_tx_id, input.prev_output_index));
                }
            }
        }
    }

    /// Select up to `limit_count` transactions / `limit_bytes` total bytes
    /// for a block template, ordered by descending fee-per-byte; ties break
    /// by earlier admission, then by tx id. Does not remove entries: the
    /// pool drains when the mined block confirms.
    pub fn drain_prioritized(
        &self,
        limit_count: usize,
        limit_bytes: usize,
    ) -> Vec<(Hash, Arc<Transaction>, Amount)> {
        let mut candidates: Vec<(&Hash, &PoolEntry)> = self.entries.iter().collect();
        candidates.sort_by(|(a_id, a), (b_id, b)| {
            b.fee_rate()
                .cmp(&a.fee_rate())
                .then_with(|| a.admitted_at.cmp(&b.admitted_at))
                .then_with(|| a_id.cmp(b_id))
        });

        let mut picked = Vec::new();
        let mut picked_bytes = 0usize;
        for (tx_id, entry) in candidates {
            if picked.len() >= limit_count {
                break;
            }
            if picked_bytes + entry.size_bytes > limit_bytes {
                continue;
            }
            picked_bytes += entry.size_bytes;
            picked.push((*tx_id, Arc::clone(&entry.transaction), entry.fee));
        }
        picked
    }

    /// Stable listing for the `transaction_pool` endpoint: priority order.
    pub fn sorted_entries(&self) -> Vec<&PoolEntry> {
        let mut listed: Vec<&PoolEntry> = self.entries.values().collect();
        listed.sort_by(|a, b| {
            match b.fee_rate().cmp(&a.fee_rate()) {
                Ordering::Equal => a.admitted_at.cmp(&b.admitted_at),
                other => other,
            }
        });
        listed
    }
}

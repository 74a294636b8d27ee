use super::Block;
use crate::crypto::{Address, Hash};
use crate::util::Amount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Key of an unspent output: the producing transaction plus output slot.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub tx_id: Hash,
    pub output_index: u32,
}

impl OutPoint {
    pub fn new(tx_id: Hash, output_index: u32) -> Self {
        OutPoint {
            tx_id,
            output_index,
        }
    }

    /// The `tx_id:output_index` form used as the relational key.
    pub fn db_key(&self) -> String {
        format!("{}:{}", self.tx_id, self.output_index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_id, self.output_index)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Utxo {
    pub amount: Amount,
    pub recipient_address: Address,
    pub block_height: u64,
}

/// Changes a block applies to the UTXO set, in application order. The node
/// persists exactly this delta alongside the block.
#[derive(Clone, Debug, Default)]
pub struct UtxoDelta {
    /// Outpoints consumed, with the id of the spending transaction.
    pub spent: Vec<(OutPoint, Hash)>,
    pub created: Vec<(OutPoint, Utxo)>,
}

/// In-memory index of unspent outputs with MVCC snapshots.
///
/// The live map is an `Arc`-shared immutable `HashMap`; a snapshot is a
/// clone of the `Arc`. Writers build the next map from the current one and
/// swap it in, so a reader holding a snapshot observes a frozen state no
/// matter how many blocks apply concurrently.
#[derive(Clone, Debug, Default)]
pub struct UtxoIndex {
    live: Arc<HashMap<OutPoint, Utxo>>,
}

impl UtxoIndex {
    pub fn new() -> Self {
        UtxoIndex::default()
    }

    pub fn snapshot(&self) -> UtxoSnapshot {
        UtxoSnapshot(Arc::clone(&self.live))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Apply a validated block: remove every spent outpoint, insert every
    /// created output. Returns the delta for persistence.
    pub fn apply_block(&mut self, block: &Block) -> UtxoDelta {
        let mut next = (*self.live).clone();
        let mut delta = UtxoDelta::default();

        for tx in &block.transactions {
            let tx_id = tx.id();
            for input in &tx.inputs {
                let outpoint = OutPoint::new(input.prev_tx_id, input.prev_output_index);
                next.remove(&outpoint);
                delta.spent.push((outpoint, tx_id));
            }
            for (output_index, output) in tx.outputs.iter().enumerate() {
                let outpoint = OutPoint::new(tx_id, output_index as u32);
                let utxo = Utxo {
                    amount: output.amount,
                    recipient_address: output.recipient_address.clone(),
                    block_height: block.header.index,
                };
                next.insert(outpoint, utxo.clone());
                delta.created.push((outpoint, utxo));
            }
        }

        self.live = Arc::new(next);
        delta
    }

    /// Rebuild the whole index by replaying blocks from genesis. Used after
    /// chain load and chain replacement.
    pub fn rebuild<'a, I: IntoIterator<Item = &'a Block>>(blocks: I) -> Self {
        let mut index = UtxoIndex::new();
        let mut map: HashMap<OutPoint, Utxo> = HashMap::new();
        for block in blocks {
            for tx in &block.transactions {
                let tx_id = tx.id();
                for input in &tx.inputs {
                    map.remove(&OutPoint::new(input.prev_tx_id, input.prev_output_index));
                }
                for (output_index, output) in tx.outputs.iter().enumerate() {
                    map.insert(
                        OutPoint::new(tx_id, output_index as u32),
                        Utxo {
                            amount: output.amount,
                            recipient_address: output.recipient_address.clone(),
                            block_height: block.header.index,
                        },
                    );
                }
            }
        }
        index.live = Arc::new(map);
        index
    }
}

/// Read-only point-in-time view of the UTXO set. Cheap to take and hold.
#[derive(Clone, Debug)]
pub struct UtxoSnapshot(Arc<HashMap<OutPoint, Utxo>>);

impl UtxoSnapshot {
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.0.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.0.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.0.iter()
    }

    /// Sum of unspent outputs paying `address`. Linear in the UTXO set.
    pub fn balance_of(&self, address: &Address) -> Amount {
        self.0
            .values()
            .filter(|utxo| &utxo.recipient_address == address)
            .fold(Amount::ZERO, |acc, utxo| {
                acc.checked_add(utxo.amount).unwrap_or(acc)
            })
    }

    /// All unspent outputs paying `address`, in stable outpoint order.
    pub fn utxos_for(&self, address: &Address) -> Vec<(OutPoint, Utxo)> {
        let mut found: Vec<(OutPoint, Utxo)> = self
            .0
            .iter()
            .filter(|(_, utxo)| &utxo.recipient_address == address)
            .map(|(outpoint, utxo)| (*outpoint, utxo.clone()))
            .collect();
        found.sort_by_key(|(outpoint, _)| *outpoint);
        found
    }
}

mod block;
mod chain;
mod mempool;
mod orphan;
mod transaction;
mod utxo;

pub use block::{Block, BlockHeader};
pub use chain::Chain;
pub use mempool::{Mempool, PoolEntry};
pub use orphan::OrphanPool;
pub use transaction::{create_signed, Transaction, TransactionInput, TransactionOutput};
pub use utxo::{OutPoint, Utxo, UtxoDelta, UtxoIndex, UtxoSnapshot};

#[cfg(test)]
mod tests;

//! Relational persistence.
//!
//! The store is the durable form of the ledger: blocks, transactions,
//! UTXOs (with spent tombstones for forensic replay), the per-address
//! balance cache, mining statistics, and the peer registry. After any
//! committed `append_block`, replaying `load_chain` plus
//! `rebuild_utxo_and_balances` reproduces the in-memory state bit for bit;
//! the balance cache never overrides the UTXO-derived truth.

use chaincore::config::DatabaseConfig;
use chaincore::crypto::{Address, Hash};
use chaincore::types::{Block, UtxoDelta, UtxoIndex};
use chaincore::util::Amount;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("corrupt block data at index {0}")]
    Codec(u64),
    #[error("consistency violation: {0}")]
    Consistency(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Cached balance row as served by the `balance` endpoint.
#[derive(Clone, Debug)]
pub struct BalanceRow {
    pub address: Address,
    pub balance: Amount,
    pub utxo_count: u64,
    pub last_activity_block: u64,
}

/// Observational mining statistics attached to an accepted submission.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct MiningStats {
    pub duration_s: Option<f64>,
    pub hash_attempts: Option<u64>,
    pub hash_rate: Option<f64>,
}

#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    "index"         INTEGER PRIMARY KEY,
    hash            TEXT    NOT NULL UNIQUE,
    previous_hash   TEXT    NOT NULL,
    merkle_root     TEXT    NOT NULL,
    timestamp       INTEGER NOT NULL,
    nonce           INTEGER NOT NULL,
    difficulty      INTEGER NOT NULL,
    miner_address   TEXT    NOT NULL,
    raw_data        BLOB    NOT NULL
);
CREATE TABLE IF NOT EXISTS transactions (
    tx_id           TEXT    NOT NULL UNIQUE,
    block_index     INTEGER NOT NULL REFERENCES blocks("index"),
    is_coinbase     INTEGER NOT NULL,
    inputs_json     TEXT    NOT NULL,
    outputs_json    TEXT    NOT NULL,
    total_amount    TEXT    NOT NULL,
    timestamp       INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS utxos (
    key                  TEXT    NOT NULL UNIQUE,
    tx_id                TEXT    NOT NULL,
    output_index         INTEGER NOT NULL,
    recipient_address    TEXT    NOT NULL,
    amount               TEXT    NOT NULL,
    block_index          INTEGER NOT NULL,
    is_spent             INTEGER NOT NULL DEFAULT 0,
    spent_in_transaction TEXT
);
CREATE INDEX IF NOT EXISTS idx_utxos_recipient ON utxos(recipient_address);
CREATE TABLE IF NOT EXISTS address_balances (
    address             TEXT PRIMARY KEY,
    balance             TEXT    NOT NULL,
    utxo_count          INTEGER NOT NULL,
    last_activity_block INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS mining_stats (
    node_id       TEXT    NOT NULL,
    block_index   INTEGER NOT NULL,
    duration_s    REAL,
    hash_attempts INTEGER,
    hash_rate     REAL,
    started_at    INTEGER,
    completed_at  INTEGER
);
CREATE TABLE IF NOT EXISTS nodes (
    node_id   TEXT NOT NULL,
    url       TEXT PRIMARY KEY,
    last_seen INTEGER NOT NULL
);
"#;

impl LedgerStore {
    /// Open the pool and create the schema if missing.
    pub async fn open(cfg: &DatabaseConfig) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(url = %cfg.url, "ledger store ready");
        Ok(LedgerStore { pool })
    }

    /// Blocks in index order, decoded from their raw form.
    pub async fn load_chain(&self) -> StoreResult<Vec<Block>> {
        let rows = sqlx::query(r#"SELECT "index", raw_data FROM blocks ORDER BY "index""#)
            .fetch_all(&self.pool)
            .await?;
        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            let index: i64 = row.get("index");
            let raw: Vec<u8> = row.get("raw_data");
            let block: Block = ciborium::de::from_reader(raw.as_slice())
                .map_err(|_| StoreError::Codec(index as u64))?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Persist one appended block: block row, transaction rows, UTXO
    /// deltas, balance upserts for every touched address. Single ACID
    /// transaction; any failure rolls the whole step back.
    pub async fn append_block(
        &self,
        block: &Block,
        delta: &UtxoDelta,
        balances: &[BalanceRow],
    ) -> StoreResult<()> {
        let mut db_tx = self.pool.begin().await?;

        let mut raw = Vec::new();
        ciborium::ser::into_writer(block, &mut raw)
            .map_err(|_| StoreError::Codec(block.header.index))?;
        let miner = block
            .miner_address()
            .map(|a| a.to_string())
            .unwrap_or_default();
        // u64 nonce round-trips through SQLite's i64 column bit-exactly
        sqlx::query(
            r#"INSERT INTO blocks
               ("index", hash, previous_hash, merkle_root, timestamp, nonce, difficulty, miner_address, raw_data)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(block.header.index as i64)
        .bind(block.hash().to_hex())
        .bind(block.header.previous_hash.to_hex())
        .bind(block.header.merkle_root.as_hash().to_hex())
        .bind(block.header.timestamp.timestamp())
        .bind(block.header.nonce as i64)
        .bind(block.header.target_difficulty as i64)
        .bind(miner)
        .bind(raw)
        .execute(&mut *db_tx)
        .await?;

        for tx in &block.transactions {
            let total = tx.total_output().unwrap_or(Amount::ZERO);
            sqlx::query(
                r#"INSERT INTO transactions
                   (tx_id, block_index, is_coinbase, inputs_json, outputs_json, total_amount, timestamp)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(tx.id().to_hex())
            .bind(block.header.index as i64)
            .bind(tx.is_coinbase())
            .bind(serde_json::to_string(&tx.inputs).expect("BUG: inputs serialize"))
            .bind(serde_json::to_string(&tx.outputs).expect("BUG: outputs serialize"))
            .bind(total.to_string())
            .bind(tx.timestamp.timestamp())
            .execute(&mut *db_tx)
            .await?;
        }

        for (outpoint, utxo) in &delta.created {
            sqlx::query(
                r#"INSERT INTO utxos
                   (key, tx_id, output_index, recipient_address, amount, block_index, is_spent, spent_in_transaction)
                   VALUES (?, ?, ?, ?, ?, ?, 0, NULL)"#,
            )
            .bind(outpoint.db_key())
            .bind(outpoint.tx_id.to_hex())
            .bind(outpoint.output_index as i64)
            .bind(utxo.recipient_address.to_string())
            .bind(utxo.amount.to_string())
            .bind(utxo.block_height as i64)
            .execute(&mut *db_tx)
            .await?;
        }

        for (outpoint, spender) in &delta.spent {
            let updated = sqlx::query(
                r#"UPDATE utxos SET is_spent = 1, spent_in_transaction = ?
                   WHERE key = ? AND is_spent = 0"#,
            )
            .bind(spender.to_hex())
            .bind(outpoint.db_key())
            .execute(&mut *db_tx)
            .await?;
            if updated.rows_affected() != 1 {
                // In-memory validation accepted a spend the store cannot see
                return Err(StoreError::Consistency(format!(
                    "spent outpoint {outpoint} missing or already spent in store"
                )));
            }
        }

        let now = Utc::now().timestamp();
        for row in balances {
            sqlx::query(
                r#"INSERT INTO address_balances
                   (address, balance, utxo_count, last_activity_block, updated_at)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT (address) DO UPDATE
                       SET balance = excluded.balance,
                           utxo_count = excluded.utxo_count,
                           last_activity_block = excluded.last_activity_block,
                           updated_at = excluded.updated_at"#,
            )
            .bind(row.address.to_string())
            .bind(row.balance.to_string())
            .bind(row.utxo_count as i64)
            .bind(row.last_activity_block as i64)
            .bind(now)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(())
    }

    /// Rewrite every ledger table from the replacement chain, then refresh
    /// the balance cache. Runs on fork adoption.
    pub async fn replace_chain(&self, blocks: &[Block]) -> StoreResult<()> {
        {
            let mut db_tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM utxos").execute(&mut *db_tx).await?;
            sqlx::query("DELETE FROM transactions")
                .execute(&mut *db_tx)
                .await?;
            sqlx::query("DELETE FROM blocks").execute(&mut *db_tx).await?;
            db_tx.commit().await?;
        }

        // Replay under a scratch index so each block's delta carries the
        // right spent/created sets.
        let mut scratch = UtxoIndex::new();
        for block in blocks {
            let delta = scratch.apply_block(block);
            self.append_block(block, &delta, &[]).await?;
        }
        self.rebuild_utxo_and_balances().await?;
        info!(blocks = blocks.len(), "store rewritten for replacement chain");
        Ok(())
    }

    /// Truncate the balance cache and recompute it from currently-unspent
    /// UTXOs. Addresses whose outputs were all spent keep a zero row.
    /// Idempotent; runs at startup and after every chain replacement.
    pub async fn rebuild_utxo_and_balances(&self) -> StoreResult<()> {
        use std::collections::HashMap;

        let rows = sqlx::query(
            "SELECT recipient_address, amount, block_index, is_spent FROM utxos",
        )
        .fetch_all(&self.pool)
        .await?;

        #[derive(Default)]
        struct Agg {
            balance: u64,
            utxo_count: u64,
            last_activity_block: u64,
        }
        let mut aggregates: HashMap<String, Agg> = HashMap::new();
        for row in rows {
            let address: String = row.get("recipient_address");
            let amount: String = row.get("amount");
            let block_index: i64 = row.get("block_index");
            let is_spent: bool = row.get("is_spent");
            let entry = aggregates.entry(address).or_default();
            entry.last_activity_block = entry.last_activity_block.max(block_index as u64);
            if !is_spent {
                let amount = Amount::parse(&amount).map_err(|e| {
                    StoreError::Consistency(format!("unparseable stored amount: {e}"))
                })?;
                entry.balance += amount.units();
                entry.utxo_count += 1;
            }
        }

        let now = Utc::now().timestamp();
        let mut db_tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM address_balances")
            .execute(&mut *db_tx)
            .await?;
        for (address, agg) in aggregates {
            sqlx::query(
                r#"INSERT INTO address_balances
                   (address, balance, utxo_count, last_activity_block, updated_at)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(address)
            .bind(Amount::from_units(agg.balance).to_string())
            .bind(agg.utxo_count as i64)
            .bind(agg.last_activity_block as i64)
            .bind(now)
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;
        Ok(())
    }

    /// Cached balance for an address; `None` when the address never
    /// appeared on chain.
    pub async fn balance(&self, address: &Address) -> StoreResult<Option<BalanceRow>> {
        let row = sqlx::query(
            "SELECT balance, utxo_count, last_activity_block FROM address_balances WHERE address = ?",
        )
        .bind(address.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let balance: String = row.get("balance");
                let utxo_count: i64 = row.get("utxo_count");
                let last_activity_block: i64 = row.get("last_activity_block");
                let balance = Amount::parse(&balance).map_err(|e| {
                    StoreError::Consistency(format!("unparseable cached balance: {e}"))
                })?;
                Ok(Some(BalanceRow {
                    address: address.clone(),
                    balance,
                    utxo_count: utxo_count as u64,
                    last_activity_block: last_activity_block as u64,
                }))
            }
            None => Ok(None),
        }
    }

    /// Observational row per accepted locally-mined block.
    pub async fn record_mining_stats(
        &self,
        node_id: Uuid,
        block_index: u64,
        stats: &MiningStats,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO mining_stats
               (node_id, block_index, duration_s, hash_attempts, hash_rate, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, NULL, ?)"#,
        )
        .bind(node_id.to_string())
        .bind(block_index as i64)
        .bind(stats.duration_s)
        .bind(stats.hash_attempts.map(|n| n as i64))
        .bind(stats.hash_rate)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh the operational peer registry.
    pub async fn upsert_node(&self, node_id: Option<Uuid>, url: &str) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO nodes (node_id, url, last_seen) VALUES (?, ?, ?)
               ON CONFLICT (url) DO UPDATE
                   SET node_id = excluded.node_id, last_seen = excluded.last_seen"#,
        )
        .bind(node_id.map(|id| id.to_string()).unwrap_or_default())
        .bind(url)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Startup consistency probe: the stored tip hash must match the loaded
    /// chain. A mismatch means the store was mutated out from under us.
    pub async fn verify_tip(&self, tip_index: u64, tip_hash: &Hash) -> StoreResult<()> {
        let row = sqlx::query(r#"SELECT hash FROM blocks WHERE "index" = ?"#)
            .bind(tip_index as i64)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let stored: String = row.get("hash");
                if stored != tip_hash.to_hex() {
                    return Err(StoreError::Consistency(format!(
                        "stored tip {stored} does not match loaded tip {tip_hash}"
                    )));
                }
                Ok(())
            }
            None => {
                warn!(tip_index, "tip row missing during verification");
                Err(StoreError::Consistency(format!(
                    "no stored block at tip index {tip_index}"
                )))
            }
        }
    }
}

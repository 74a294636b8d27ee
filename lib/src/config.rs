//! Configuration for consensus parameters, node operation, and the
//! database connection.
//!
//! Priority (highest to lowest):
//! 1. Environment variables
//! 2. `.env` file
//! 3. Hardcoded defaults
//!
//! Consensus values must agree across a network; node values are local.

use crate::error::{ChainError, Result};
use crate::util::Amount;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<ChainConfig> = OnceLock::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Consensus rules shared by every node in the network
    pub consensus: ConsensusConfig,

    /// Node-specific settings (ports, peers, intervals)
    pub node: NodeConfig,

    /// Relational store connection
    pub database: DatabaseConfig,
}

/// Network consensus parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Baseline difficulty in bits (`BLOCKCHAIN_DIFFICULTY`)
    pub difficulty: u32,

    /// Target seconds between blocks (`TARGET_BLOCK_TIME`)
    pub target_block_time: u64,

    /// Blocks between difficulty adjustments (`DIFFICULTY_ADJUSTMENT_INTERVAL`)
    pub adjustment_interval: u64,

    /// Whether retargeting runs at all (`DIFFICULTY_ADJUSTMENT_ENABLED`)
    pub adjustment_enabled: bool,

    /// Per-step difficulty clamp (`MAX_DIFFICULTY_CHANGE`)
    pub max_difficulty_change: u32,

    /// Difficulty floor (`MIN_DIFFICULTY`)
    pub min_difficulty: u32,

    /// Difficulty ceiling (`MAX_DIFFICULTY`)
    pub max_difficulty: u32,

    /// Coinbase subsidy before fees (`BLOCK_REWARD`)
    pub block_reward: Amount,

    /// Maximum transactions per block, coinbase included (`MAX_BLOCK_SIZE`)
    pub max_block_transactions: usize,
}

/// Node operation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port the HTTP API listens on (`NODE_PORT`)
    pub port: u16,

    /// URL this node advertises to peers (`SELF_URL`)
    pub self_url: String,

    /// Bootstrap peer URLs, comma-separated (`BOOTSTRAP_PEERS`)
    pub bootstrap_peers: Vec<String>,

    /// Peer-count range (`MIN_PEERS`, `TARGET_PEERS`, `MAX_PEERS`)
    pub min_peers: usize,
    pub target_peers: usize,
    pub max_peers: usize,

    /// Seconds between peer discovery rounds (`DISCOVERY_INTERVAL`)
    pub discovery_interval_secs: u64,

    /// Seconds between chain sync rounds (`SYNC_INTERVAL`)
    pub sync_interval_secs: u64,

    /// Seconds between mempool pull rounds (`MEMPOOL_SYNC_INTERVAL`)
    pub mempool_sync_interval_secs: u64,

    /// Per-request deadline for outbound peer calls (`PEER_PUSH_TIMEOUT`)
    pub push_timeout_secs: u64,

    /// Consecutive failures before a peer is considered inactive
    /// (`PEER_FAILURE_THRESHOLD`)
    pub peer_failure_threshold: u32,

    /// Mempool capacity (`MEMPOOL_MAX_TRANSACTIONS`, `MEMPOOL_MAX_BYTES`)
    pub mempool_max_transactions: usize,
    pub mempool_max_bytes: usize,
}

/// Relational store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string (`DATABASE_URL`)
    pub url: String,

    /// Connection pool bound (`DATABASE_MAX_CONNECTIONS`)
    pub max_connections: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: crate::DEFAULT_DIFFICULTY,
            target_block_time: crate::DEFAULT_TARGET_BLOCK_TIME,
            adjustment_interval: crate::DEFAULT_ADJUSTMENT_INTERVAL,
            adjustment_enabled: true,
            max_difficulty_change: crate::DEFAULT_MAX_DIFFICULTY_CHANGE,
            min_difficulty: 1,
            max_difficulty: 64,
            block_reward: Amount::from_coins(crate::DEFAULT_BLOCK_REWARD),
            max_block_transactions: crate::DEFAULT_MAX_BLOCK_TRANSACTIONS,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            self_url: "http://127.0.0.1:9000".to_string(),
            bootstrap_peers: vec![],
            min_peers: 1,
            target_peers: 8,
            max_peers: 50,
            discovery_interval_secs: 60,
            sync_interval_secs: 30,
            mempool_sync_interval_secs: 15,
            push_timeout_secs: 5,
            peer_failure_threshold: 3,
            mempool_max_transactions: 5_000,
            mempool_max_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chaincore.db?mode=rwc".to_string(),
            max_connections: 8,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            node: NodeConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl ChainConfig {
    /// Load configuration with the following priority:
    /// 1. Environment variables (highest priority)
    /// 2. `.env` file
    /// 3. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self> {
        // Try to load .env file (fails silently if not found)
        dotenvy::dotenv().ok();

        let config = ChainConfig {
            consensus: ConsensusConfig::from_env()?,
            node: NodeConfig::from_env(),
            database: DatabaseConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Get or initialize the global configuration. Panics on invalid
    /// configuration, which is fatal before serving anyway.
    pub fn global() -> &'static ChainConfig {
        CONFIG.get_or_init(|| match ChainConfig::load() {
            Ok(config) => config,
            Err(e) => panic!("fatal: {e}"),
        })
    }

    /// Install a specific configuration (tests, embedding). First call wins.
    pub fn init(config: ChainConfig) -> &'static ChainConfig {
        CONFIG.get_or_init(|| config)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.consensus;
        if c.min_difficulty > c.max_difficulty {
            return Err(ChainError::Config(format!(
                "MIN_DIFFICULTY {} above MAX_DIFFICULTY {}",
                c.min_difficulty, c.max_difficulty
            )));
        }
        if !(c.min_difficulty..=c.max_difficulty).contains(&c.difficulty) {
            return Err(ChainError::Config(format!(
                "BLOCKCHAIN_DIFFICULTY {} outside [{}, {}]",
                c.difficulty, c.min_difficulty, c.max_difficulty
            )));
        }
        if c.max_difficulty > 255 {
            return Err(ChainError::Config("MAX_DIFFICULTY above 255".into()));
        }
        if c.target_block_time == 0 || c.adjustment_interval == 0 {
            return Err(ChainError::Config(
                "TARGET_BLOCK_TIME and DIFFICULTY_ADJUSTMENT_INTERVAL must be nonzero".into(),
            ));
        }
        if c.max_block_transactions == 0 {
            return Err(ChainError::Config("MAX_BLOCK_SIZE must be nonzero".into()));
        }
        let n = &self.node;
        if n.min_peers > n.target_peers || n.target_peers > n.max_peers {
            return Err(ChainError::Config(format!(
                "peer bounds must satisfy MIN <= TARGET <= MAX, got {} <= {} <= {}",
                n.min_peers, n.target_peers, n.max_peers
            )));
        }
        Ok(())
    }
}

impl ConsensusConfig {
    fn from_env() -> Result<Self> {
        let defaults = ConsensusConfig::default();
        let block_reward = match env_var("BLOCK_REWARD") {
            Some(raw) => Amount::parse(&raw)
                .map_err(|e| ChainError::Config(format!("BLOCK_REWARD: {e}")))?,
            None => defaults.block_reward,
        };
        Ok(Self {
            difficulty: parse_env("BLOCKCHAIN_DIFFICULTY").unwrap_or(defaults.difficulty),
            target_block_time: parse_env("TARGET_BLOCK_TIME").unwrap_or(defaults.target_block_time),
            adjustment_interval: parse_env("DIFFICULTY_ADJUSTMENT_INTERVAL")
                .unwrap_or(defaults.adjustment_interval),
            adjustment_enabled: parse_env("DIFFICULTY_ADJUSTMENT_ENABLED")
                .unwrap_or(defaults.adjustment_enabled),
            max_difficulty_change: parse_env("MAX_DIFFICULTY_CHANGE")
                .unwrap_or(defaults.max_difficulty_change),
            min_difficulty: parse_env("MIN_DIFFICULTY").unwrap_or(defaults.min_difficulty),
            max_difficulty: parse_env("MAX_DIFFICULTY").unwrap_or(defaults.max_difficulty),
            block_reward,
            max_block_transactions: parse_env("MAX_BLOCK_SIZE")
                .unwrap_or(defaults.max_block_transactions),
        })
    }
}

impl NodeConfig {
    fn from_env() -> Self {
        let defaults = NodeConfig::default();
        let bootstrap_peers = env_var("BOOTSTRAP_PEERS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.bootstrap_peers);
        let port = parse_env("NODE_PORT").unwrap_or(defaults.port);

        Self {
            self_url: env_var("SELF_URL")
                .unwrap_or_else(|| format!("http://127.0.0.1:{port}")),
            port,
            bootstrap_peers,
            min_peers: parse_env("MIN_PEERS").unwrap_or(defaults.min_peers),
            target_peers: parse_env("TARGET_PEERS").unwrap_or(defaults.target_peers),
            max_peers: parse_env("MAX_PEERS").unwrap_or(defaults.max_peers),
            discovery_interval_secs: parse_env("DISCOVERY_INTERVAL")
                .unwrap_or(defaults.discovery_interval_secs),
            sync_interval_secs: parse_env("SYNC_INTERVAL").unwrap_or(defaults.sync_interval_secs),
            mempool_sync_interval_secs: parse_env("MEMPOOL_SYNC_INTERVAL")
                .unwrap_or(defaults.mempool_sync_interval_secs),
            push_timeout_secs: parse_env("PEER_PUSH_TIMEOUT")
                .unwrap_or(defaults.push_timeout_secs),
            peer_failure_threshold: parse_env("PEER_FAILURE_THRESHOLD")
                .unwrap_or(defaults.peer_failure_threshold),
            mempool_max_transactions: parse_env("MEMPOOL_MAX_TRANSACTIONS")
                .unwrap_or(defaults.mempool_max_transactions),
            mempool_max_bytes: parse_env("MEMPOOL_MAX_BYTES")
                .unwrap_or(defaults.mempool_max_bytes),
        }
    }
}

impl DatabaseConfig {
    fn from_env() -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            url: env_var("DATABASE_URL").unwrap_or(defaults.url),
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(defaults.max_connections),
        }
    }
}

/// Helper function to get environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Helper function to parse environment variable
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key)?.parse().ok()
}

use anyhow::Result;
use argh::FromArgs;
use chaincore::config::ChainConfig;
use tracing::info;

mod handler;
mod peers;
mod service;
mod store;
mod sync;
mod util;
mod wire;

#[derive(FromArgs)]
/// A proof-of-work UTXO cryptocurrency node
struct Args {
    #[argh(option)]
    /// port number (defaults to NODE_PORT env var or 9000)
    port: Option<u16>,
    #[argh(option)]
    /// database URL (defaults to DATABASE_URL env var or ./chaincore.db)
    database_url: Option<String>,
    #[argh(option)]
    /// URL this node advertises to peers (defaults to SELF_URL env var)
    self_url: Option<String>,
    #[argh(positional)]
    /// bootstrap peer URLs (can also use BOOTSTRAP_PEERS env var)
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    util::init_tracing();

    // Priority: CLI args > environment vars > defaults
    let args: Args = argh::from_env();
    let mut config = ChainConfig::load().map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(port) = args.port {
        config.node.port = port;
        config.node.self_url = format!("http://127.0.0.1:{port}");
    }
    if let Some(url) = args.self_url {
        config.node.self_url = url;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }
    if !args.peers.is_empty() {
        config.node.bootstrap_peers = args.peers;
    }
    let config = ChainConfig::init(config);

    info!("starting chaincore node");
    info!(port = config.node.port, db = %config.database.url, "node configuration");
    if !config.node.bootstrap_peers.is_empty() {
        info!(peers = ?config.node.bootstrap_peers, "bootstrap peers");
    }

    let store = store::LedgerStore::open(&config.database).await?;
    let service = service::NodeService::start(config, store).await?;
    let peers = peers::PeerManager::new(config);

    util::spawn_workers(service.clone(), peers.clone());
    util::serve(service, peers).await
}

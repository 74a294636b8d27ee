use crate::handler::{self, AppState};
use crate::peers::PeerManager;
use crate::service::NodeService;
use crate::sync;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Spawn the periodic workers: chain sync, peer discovery, mempool gossip.
/// Normally you would keep and join the handles; these run for the process
/// lifetime.
pub fn spawn_workers(service: Arc<NodeService>, peers: Arc<PeerManager>) {
    tokio::spawn(sync::sync_worker(Arc::clone(&service), Arc::clone(&peers)));
    tokio::spawn(sync::discovery_worker(
        Arc::clone(&service),
        Arc::clone(&peers),
    ));
    tokio::spawn(sync::mempool_sync_worker(service, peers));
}

/// Bind the HTTP API and serve until the process ends.
pub async fn serve(service: Arc<NodeService>, peers: Arc<PeerManager>) -> Result<()> {
    let port = service.config().node.port;
    let app = handler::router(AppState { service, peers });
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

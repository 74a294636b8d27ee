//! Periodic background workers: chain sync, peer discovery, mempool gossip.
//!
//! Each worker runs on its own interval. Peer I/O happens outside the
//! writer region; only the final state swap (inside `NodeService`) is
//! serialized. A worker's failures are logged and counted against the
//! peer, never propagated.

use crate::peers::PeerManager;
use crate::service::NodeService;
use chaincore::U256;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, info, warn};

/// A peer at most this many blocks ahead on the same history is caught up
/// by appending a fetched range; anything else pulls the full chain.
const RANGE_SYNC_MAX_GAP: u64 = 20;

pub async fn sync_worker(service: Arc<NodeService>, peers: Arc<PeerManager>) {
    // A brand-new node has only genesis: sync aggressively before the
    // first interval elapses.
    if service.state().chain.height() == 0 {
        sync_round(&service, &peers).await;
    }
    let mut interval = time::interval(time::Duration::from_secs(
        service.config().node.sync_interval_secs,
    ));
    loop {
        interval.tick().await;
        sync_round(&service, &peers).await;
    }
}

/// One pass over the active peers: adopt any strictly heavier chain.
pub async fn sync_round(service: &Arc<NodeService>, peers: &Arc<PeerManager>) {
    for url in peers.active_urls() {
        // Re-read per peer: an adoption earlier in the loop moves the tip
        let local = service.state();
        let local_work = local.chain.cumulative_work();
        let local_len = local.chain.len() as u64;

        let Some(status) = peers.fetch_status(&url).await else {
            continue;
        };
        let Ok(peer_work) = U256::from_dec_str(&status.cumulative_work) else {
            warn!(%url, "peer advertises unparseable cumulative work");
            continue;
        };
        if peer_work <= local_work {
            continue;
        }
        info!(
            %url,
            peer_length = status.chain_length,
            local_length = local_len,
            "peer advertises heavier chain"
        );

        // Small same-history gap: fetch just the missing blocks and append.
        if status.chain_length > local_len
            && status.chain_length - local_len <= RANGE_SYNC_MAX_GAP
        {
            if let Some(blocks) = peers
                .fetch_range(&url, local_len, status.chain_length - 1)
                .await
            {
                if append_range(service, blocks).await {
                    continue;
                }
            }
        }

        // Range append did not apply (divergent history or fetch failure):
        // pull the whole chain and let fork resolution decide.
        let Some(blocks) = peers.fetch_chain(&url).await else {
            continue;
        };
        match service.adopt_remote_chain(blocks).await {
            Ok(true) => info!(%url, "adopted heavier chain from peer"),
            Ok(false) => debug!(%url, "peer chain not adopted"),
            Err(e) => warn!(%url, "peer chain rejected: {e}"),
        }
    }
}

/// Append a contiguous run of blocks onto the local tip. Returns false as
/// soon as one block does not apply (the histories diverge).
async fn append_range(service: &Arc<NodeService>, blocks: Vec<chaincore::types::Block>) -> bool {
    for block in blocks {
        match service.submit_block(block, false, None).await {
            Ok(_) => {}
            Err(e) => {
                debug!("range append stopped: {e}");
                return false;
            }
        }
    }
    true
}

pub async fn discovery_worker(service: Arc<NodeService>, peers: Arc<PeerManager>) {
    // Startup discovery, then periodic re-discovery.
    peers.discover(service.store()).await;
    let mut interval = time::interval(time::Duration::from_secs(
        service.config().node.discovery_interval_secs,
    ));
    loop {
        interval.tick().await;
        peers.discover(service.store()).await;
    }
}

pub async fn mempool_sync_worker(service: Arc<NodeService>, peers: Arc<PeerManager>) {
    let mut interval = time::interval(time::Duration::from_secs(
        service.config().node.mempool_sync_interval_secs,
    ));
    loop {
        interval.tick().await;
        mempool_sync_round(&service, &peers).await;
    }
}

/// Best-effort mempool convergence: pull peer pools, admit what is novel
/// and valid, skip the rest without re-broadcasting.
pub async fn mempool_sync_round(service: &Arc<NodeService>, peers: &Arc<PeerManager>) {
    for url in peers.active_urls() {
        let Some(transactions) = peers.fetch_mempool(&url).await else {
            continue;
        };
        let admitted = admit_novel(service, transactions).await;
        if admitted > 0 {
            debug!(%url, admitted, "admitted transactions from peer mempool");
        }
    }
}

/// Admit transactions pulled from a peer pool: novel, valid ones enter the
/// local mempool; duplicates, conflicts, and invalid entries are skipped.
async fn admit_novel(
    service: &Arc<NodeService>,
    transactions: Vec<chaincore::types::Transaction>,
) -> usize {
    let mut admitted = 0usize;
    for tx in transactions {
        if service.state().mempool.contains(&tx.id()) {
            continue;
        }
        if service.admit_transaction(tx).await.is_ok() {
            admitted += 1;
        }
    }
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::NodeService;
    use crate::store::LedgerStore;
    use chaincore::config::{ChainConfig, DatabaseConfig};
    use chaincore::crypto::{Address, PrivateKey};
    use chaincore::types::{create_signed, Block, TransactionOutput};
    use chaincore::util::Amount;

    /// A full node service over a throwaway in-memory store. Default
    /// consensus keeps difficulty at 1 until the first retarget window, so
    /// mining in tests is a couple of nonce attempts.
    async fn memory_service() -> Arc<NodeService> {
        let config = ChainConfig::init(ChainConfig::default());
        let store = LedgerStore::open(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap();
        NodeService::start(config, store).await.unwrap()
    }

    /// Request a template from the node and grind the nonce, exactly as an
    /// external miner would.
    async fn mine_on(service: &Arc<NodeService>, miner: &Address) -> Block {
        let template = service.request_template(miner.clone()).await.unwrap();
        let mut block = template.block;
        let target = block.header.target();
        while !block.hash().matches_target(target) {
            block.header.nonce += 1;
        }
        block
    }

    #[tokio::test]
    async fn append_range_extends_local_chain() {
        let source = memory_service().await;
        let miner = PrivateKey::new_key().public_key().address();
        for _ in 0..3 {
            let block = mine_on(&source, &miner).await;
            source.submit_block(block, true, None).await.unwrap();
        }

        // A fresh node receives the missing blocks as a range, the small
        // same-history gap path of the sync round
        let replica = memory_service().await;
        let range: Vec<Block> = source
            .state()
            .chain
            .blocks()
            .skip(1)
            .map(|b| (**b).clone())
            .collect();
        assert!(append_range(&replica, range).await);

        assert_eq!(replica.state().chain.height(), 3);
        assert_eq!(
            replica.state().chain.tip().hash(),
            source.state().chain.tip().hash()
        );
    }

    #[tokio::test]
    async fn append_range_stops_on_divergent_history() {
        let source = memory_service().await;
        let other = memory_service().await;
        let miner = PrivateKey::new_key().public_key().address();
        let rival_miner = PrivateKey::new_key().public_key().address();

        let block = mine_on(&source, &miner).await;
        source.submit_block(block.clone(), true, None).await.unwrap();
        let rival = mine_on(&other, &rival_miner).await;
        other.submit_block(rival, true, None).await.unwrap();
        let tip_before = other.state().chain.tip().hash();

        // source's block forks off other's history at genesis and carries
        // no extra work, so the range does not apply
        assert!(!append_range(&other, vec![block]).await);
        assert_eq!(other.state().chain.tip().hash(), tip_before);
        assert_eq!(other.state().chain.height(), 1);
    }

    #[tokio::test]
    async fn admit_novel_admits_each_transaction_once() {
        let service = memory_service().await;
        let miner_key = PrivateKey::new_key();
        let miner = miner_key.public_key().address();
        let block = mine_on(&service, &miner).await;
        service.submit_block(block, true, None).await.unwrap();

        let coinbase_id = service.state().chain.tip().transactions[0].id();
        let pay = |coins: &str| {
            create_signed(
                &[(coinbase_id, 0)],
                vec![TransactionOutput {
                    amount: Amount::parse(coins).unwrap(),
                    recipient_address: PrivateKey::new_key().public_key().address(),
                }],
                &miner_key,
            )
        };
        let tx = pay("49");
        let conflicting = pay("48");

        // The duplicate and the conflicting spend are both skipped
        let pulled = vec![tx.clone(), tx.clone(), conflicting];
        assert_eq!(admit_novel(&service, pulled).await, 1);
        assert_eq!(admit_novel(&service, vec![tx.clone()]).await, 0);
        assert_eq!(service.state().mempool.len(), 1);
        assert!(service.state().mempool.contains(&tx.id()));
    }
}

use super::{Block, UtxoDelta, UtxoIndex};
use crate::config::ConsensusConfig;
use crate::crypto::Hash;
use crate::difficulty;
use crate::error::{ChainError, Result};
use crate::genesis;
use crate::U256;
use std::sync::Arc;
use tracing::info;

/// The committed block sequence. Always starts at the canonical genesis;
/// mutated only by `append` and `replace`, both behind the node's single
/// write-serialization point.
#[derive(Clone, Debug)]
pub struct Chain {
    blocks: Vec<Arc<Block>>,
    cumulative_work: U256,
}

impl Chain {
    /// A fresh chain holding only the genesis block, with the genesis
    /// outputs applied to a fresh UTXO index.
    pub fn bootstrap() -> (Chain, UtxoIndex) {
        let genesis = genesis::genesis_block();
        let mut utxo = UtxoIndex::new();
        utxo.apply_block(&genesis);
        let chain = Chain {
            cumulative_work: genesis.header.work(),
            blocks: vec![Arc::new(genesis)],
        };
        (chain, utxo)
    }

    pub fn tip(&self) -> &Arc<Block> {
        self.blocks.last().expect("BUG: chain never empty")
    }

    /// Height of the tip (0-based), equal to `len() - 1`.
    pub fn height(&self) -> u64 {
        self.tip().header.index
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks.iter()
    }

    pub fn get(&self, index: u64) -> Option<&Arc<Block>> {
        self.blocks.get(index as usize)
    }

    /// Locate a committed block by hash; linear scan from the tip since
    /// fork points are overwhelmingly recent.
    pub fn find_by_hash(&self, hash: &Hash) -> Option<(u64, &Arc<Block>)> {
        self.blocks
            .iter()
            .enumerate()
            .rev()
            .find(|(_, block)| &block.hash() == hash)
            .map(|(index, block)| (index as u64, block))
    }

    pub fn contains_transaction(&self, tx_id: &Hash) -> bool {
        self.blocks
            .iter()
            .any(|block| block.transactions.iter().any(|tx| &tx.id() == tx_id))
    }

    /// Fork-selection weight: sum of per-block work.
    pub fn cumulative_work(&self) -> U256 {
        self.cumulative_work
    }

    /// Validate and append a block at the tip, applying its UTXO deltas.
    /// Returns the delta for persistence.
    pub fn append(
        &mut self,
        block: Block,
        utxo: &mut UtxoIndex,
        cfg: &ConsensusConfig,
    ) -> Result<UtxoDelta> {
        if block.header.index == 0 {
            return Err(ChainError::BadIndex(
                "genesis is fixed and cannot be re-appended".into(),
            ));
        }
        let expected = difficulty::expected_difficulty(self, cfg);
        let tip = Arc::clone(self.tip());
        crate::validation::validate_block(&block, tip.as_ref(), &utxo.snapshot(), cfg, expected)?;
        let delta = utxo.apply_block(&block);
        self.cumulative_work = self.cumulative_work + block.header.work();
        self.blocks.push(Arc::new(block));
        Ok(delta)
    }

    /// Replay a candidate block sequence from genesis under a scratch UTXO
    /// index, enforcing every append-path invariant. Returns the rebuilt
    /// chain and UTXO state on success.
    pub fn validate_candidate(blocks: Vec<Block>, cfg: &ConsensusConfig) -> Result<(Chain, UtxoIndex)> {
        let mut candidate = blocks.into_iter();
        let first = candidate
            .next()
            .ok_or_else(|| ChainError::BadIndex("candidate chain is empty".into()))?;
        if first.hash() != genesis::genesis_block().hash() {
            return Err(ChainError::BadPrevHash(
                "candidate does not start at the canonical genesis".into(),
            ));
        }
        let (mut chain, mut utxo) = Chain::bootstrap();
        for block in candidate {
            chain.append(block, &mut utxo, cfg)?;
        }
        Ok((chain, utxo))
    }

    /// Swap in a strictly heavier candidate. Equal work keeps the incumbent
    /// so competing nodes do not churn between equally good chains.
    pub fn replace(&mut self, candidate: Chain) -> bool {
        if candidate.cumulative_work <= self.cumulative_work {
            return false;
        }
        info!(
            old_height = self.height(),
            new_height = candidate.height(),
            "replacing chain with heavier candidate"
        );
        *self = candidate;
        true
    }

    /// Owned copies of all blocks, index order. Used to hand candidates to
    /// `validate_candidate` and to rewrite persistence on replace.
    pub fn to_blocks(&self) -> Vec<Block> {
        self.blocks.iter().map(|b| (**b).clone()).collect()
    }
}

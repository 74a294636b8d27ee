use super::{Block, Chain};
use crate::crypto::Hash;
use std::collections::HashMap;
use std::collections::VecDeque;

/// Validated-enough blocks whose parent is not on the main chain yet,
/// keyed by block hash. Bounded; the least recently touched entry is
/// evicted when a new orphan arrives at capacity.
#[derive(Clone, Debug)]
pub struct OrphanPool {
    capacity: usize,
    blocks: HashMap<Hash, Block>,
    // Recency order, oldest first. Touched hashes move to the back.
    order: VecDeque<Hash>,
}

impl OrphanPool {
    pub fn new(capacity: usize) -> Self {
        OrphanPool {
            capacity,
            blocks: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            self.touch(&hash);
            return;
        }
        if self.blocks.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.blocks.remove(&evicted);
            }
        }
        self.order.push_back(hash);
        self.blocks.insert(hash, block);
    }

    fn touch(&mut self, hash: &Hash) {
        if let Some(pos) = self.order.iter().position(|h| h == hash) {
            let _ = self.order.remove(pos);
            self.order.push_back(*hash);
        }
    }

    /// Starting from `head`, walk `previous_hash` links through the pool
    /// until a committed ancestor is found, then assemble the full
    /// candidate chain (committed prefix + orphan path). `None` when the
    /// path never reaches the main chain.
    pub fn assemble_candidate(&mut self, head: &Block, chain: &Chain) -> Option<Vec<Block>> {
        let mut path = vec![head.clone()];
        let mut parent = head.header.previous_hash;
        loop {
            if let Some((ancestor_index, _)) = chain.find_by_hash(&parent) {
                let mut candidate: Vec<Block> = chain
                    .blocks()
                    .take(ancestor_index as usize + 1)
                    .map(|b| (**b).clone())
                    .collect();
                path.reverse();
                for block in &path {
                    self.touch(&block.hash());
                }
                candidate.extend(path);
                return Some(candidate);
            }
            match self.blocks.get(&parent) {
                Some(block) => {
                    path.push(block.clone());
                    parent = block.header.previous_hash;
                }
                None => return None,
            }
        }
    }

    /// Drop every orphan now present on the committed chain.
    pub fn prune_connected(&mut self, chain: &Chain) {
        let connected: Vec<Hash> = self
            .blocks
            .keys()
            .filter(|hash| chain.find_by_hash(hash).is_some())
            .copied()
            .collect();
        for hash in connected {
            self.blocks.remove(&hash);
            if let Some(pos) = self.order.iter().position(|h| h == &hash) {
                let _ = self.order.remove(pos);
            }
        }
    }
}

//! Per-block world-state snapshots and the chain head they are checked against.

use super::{InMemoryWorldState, WorldView};
use crate::error::StateError;
use crate::types::BlockHeader;
use alloy_primitives::B256;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Source of world-state snapshots for speculative execution.
pub trait WorldStateProvider: Send + Sync {
    /// Hash of the current canonical chain head.
    fn chain_head(&self) -> B256;

    /// Opens the world state as of `block_hash`.
    ///
    /// Fails when the state was pruned or cannot be read.
    fn world_state(&self, block_hash: B256) -> Result<Arc<dyn WorldView>, StateError>;
}

/// Resolves canonical block hashes by number (`BLOCKHASH`).
pub trait BlockHashLookup: Send + Sync {
    fn block_hash(&self, number: u64) -> Option<B256>;
}

impl<F> BlockHashLookup for F
where
    F: Fn(u64) -> Option<B256> + Send + Sync,
{
    fn block_hash(&self, number: u64) -> Option<B256> {
        self(number)
    }
}

#[derive(Debug, Default)]
struct ArchiveInner {
    states: HashMap<B256, Arc<InMemoryWorldState>>,
    canonical: BTreeMap<u64, B256>,
    head: B256,
}

/// In-memory archive of world states keyed by block hash.
#[derive(Debug, Default)]
pub struct InMemoryWorldStateArchive {
    inner: RwLock<ArchiveInner>,
}

impl InMemoryWorldStateArchive {
    /// Creates an archive whose chain head is `genesis`.
    pub fn new(genesis: &BlockHeader, state: InMemoryWorldState) -> Self {
        let archive = Self::default();
        archive.persist(genesis, state);
        archive
    }

    /// Stores the state produced by `header` and makes it the chain head.
    pub fn persist(&self, header: &BlockHeader, state: InMemoryWorldState) -> B256 {
        let hash = header.hash_slow();
        let mut inner = self.inner.write();
        inner.states.insert(hash, Arc::new(state));
        inner.canonical.insert(header.number, hash);
        inner.head = hash;
        debug!(number = header.number, %hash, "persisted world state");
        hash
    }

    pub fn set_chain_head(&self, hash: B256) {
        self.inner.write().head = hash;
    }

    /// Drops the state stored for `hash`. Returns whether it existed.
    pub fn prune(&self, hash: &B256) -> bool {
        self.inner.write().states.remove(hash).is_some()
    }

    pub fn state(&self, hash: &B256) -> Option<Arc<InMemoryWorldState>> {
        self.inner.read().states.get(hash).cloned()
    }
}

impl WorldStateProvider for InMemoryWorldStateArchive {
    fn chain_head(&self) -> B256 {
        self.inner.read().head
    }

    fn world_state(&self, block_hash: B256) -> Result<Arc<dyn WorldView>, StateError> {
        self.state(&block_hash)
            .map(|state| state as Arc<dyn WorldView>)
            .ok_or(StateError::Unavailable(block_hash))
    }
}

impl BlockHashLookup for InMemoryWorldStateArchive {
    fn block_hash(&self, number: u64) -> Option<B256> {
        self.inner.read().canonical.get(&number).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64, parent_hash: B256) -> BlockHeader {
        BlockHeader {
            number,
            parent_hash,
            ..Default::default()
        }
    }

    #[test]
    fn test_persist_advances_head() {
        let genesis = header(0, B256::ZERO);
        let archive = InMemoryWorldStateArchive::new(&genesis, InMemoryWorldState::new());
        let genesis_hash = genesis.hash_slow();
        assert_eq!(archive.chain_head(), genesis_hash);
        assert_eq!(archive.block_hash(0), Some(genesis_hash));

        let child = header(1, genesis_hash);
        let child_hash = archive.persist(&child, InMemoryWorldState::new());
        assert_eq!(archive.chain_head(), child_hash);
        assert_eq!(archive.block_hash(1), Some(child_hash));
        assert!(archive.world_state(genesis_hash).is_ok());
    }

    #[test]
    fn test_pruned_state_is_unavailable() {
        let genesis = header(0, B256::ZERO);
        let archive = InMemoryWorldStateArchive::new(&genesis, InMemoryWorldState::new());
        let hash = genesis.hash_slow();

        assert!(archive.prune(&hash));
        assert!(!archive.prune(&hash));
        assert_eq!(
            archive.world_state(hash).unwrap_err(),
            StateError::Unavailable(hash)
        );
    }

    #[test]
    fn test_closure_block_hash_lookup() {
        let lookup = |number: u64| (number == 7).then(|| B256::repeat_byte(7));
        assert_eq!(lookup.block_hash(7), Some(B256::repeat_byte(7)));
        assert_eq!(BlockHashLookup::block_hash(&lookup, 8), None);
    }
}

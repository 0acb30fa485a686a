//! Concurrent trie-node storage consumed by the trie synchroniser.

use crate::StoreResult;
use kn_types::Hash;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// Storage for content-addressed trie nodes.
///
/// Trie-sync workers call `put` and `contains` concurrently; implementations
/// must serialise writes per key but keep reads lock-free or close to it.
pub trait TrieStorageManager: Send + Sync {
    /// Persist a verified node under its content hash.
    fn put(&self, hash: &Hash, bytes: &[u8]) -> StoreResult<()>;
    /// True when the node is already resident.
    fn contains(&self, hash: &Hash) -> StoreResult<bool>;
    /// Read a resident node.
    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>>;
    /// Mark the sub-DAG under `root` as a durable snapshot.
    fn take_snapshot(&self, root: &Hash);
}

/// Number of independently locked segments in [MemTrieStorage].
const SEGMENTS: usize = 16;

/// Segmented in-memory trie storage.
///
/// Writes only contend within one segment, which keeps parallel trie-sync
/// workers off each other's locks.
pub struct MemTrieStorage {
    segments: [RwLock<HashMap<Hash, Vec<u8>>>; SEGMENTS],
    snapshots: Mutex<Vec<Hash>>,
}

impl MemTrieStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            segments: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    fn segment(&self, hash: &Hash) -> &RwLock<HashMap<Hash, Vec<u8>>> {
        &self.segments[hash.as_bytes()[0] as usize % SEGMENTS]
    }

    /// Total number of resident nodes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.read().len()).sum()
    }

    /// True when no node is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Roots snapshotted so far, in call order.
    pub fn snapshots(&self) -> Vec<Hash> {
        self.snapshots.lock().clone()
    }
}

impl Default for MemTrieStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl TrieStorageManager for MemTrieStorage {
    fn put(&self, hash: &Hash, bytes: &[u8]) -> StoreResult<()> {
        self.segment(hash).write().insert(*hash, bytes.to_vec());
        Ok(())
    }

    fn contains(&self, hash: &Hash) -> StoreResult<bool> {
        Ok(self.segment(hash).read().contains_key(hash))
    }

    fn get(&self, hash: &Hash) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.segment(hash).read().get(hash).cloned())
    }

    fn take_snapshot(&self, root: &Hash) {
        self.snapshots.lock().push(*root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_contains_get() {
        let store = MemTrieStorage::new();
        let hash = Hash::compute(b"node");
        assert!(!store.contains(&hash).unwrap());
        store.put(&hash, b"node").unwrap();
        assert!(store.contains(&hash).unwrap());
        assert_eq!(store.get(&hash).unwrap(), Some(b"node".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_records_root() {
        let store = MemTrieStorage::new();
        let root = Hash::compute(b"root");
        store.take_snapshot(&root);
        assert_eq!(store.snapshots(), vec![root]);
    }
}

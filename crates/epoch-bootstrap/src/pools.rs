//! Typed pools shared between interceptors and synchronisers.

use kn_types::{BlockHeader, Hash, MiniBlock, SignedTransaction};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{futures::Notified, Notify};

/// A hash-keyed pool with insert notifications.
///
/// Interceptor threads produce, synchroniser tasks consume. The first value
/// stored under a hash wins; later inserts for the same hash are ignored, so
/// readers never observe a key changing value.
pub struct TypedPool<T> {
    inner: RwLock<HashMap<Hash, Arc<T>>>,
    inserted: Notify,
}

impl<T> TypedPool<T> {
    /// An empty pool.
    pub fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()), inserted: Notify::new() }
    }

    /// Store `value` under `hash`; returns false when the hash was already
    /// present.
    pub fn insert(&self, hash: Hash, value: T) -> bool {
        let inserted = {
            let mut inner = self.inner.write();
            if inner.contains_key(&hash) {
                false
            } else {
                inner.insert(hash, Arc::new(value));
                true
            }
        };
        if inserted {
            self.inserted.notify_waiters();
        }
        inserted
    }

    /// Look up a value by hash.
    pub fn get(&self, hash: &Hash) -> Option<Arc<T>> {
        self.inner.read().get(hash).cloned()
    }

    /// True when a value is stored under the hash.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().contains_key(hash)
    }

    /// Remove a value by hash.
    pub fn remove(&self, hash: &Hash) -> Option<Arc<T>> {
        self.inner.write().remove(hash)
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// A wait handle for the next insert.
    ///
    /// Callers must pin and `enable` the handle BEFORE polling the pool, or
    /// an insert racing the poll can be missed and the waiter sleeps until
    /// the next unrelated insert.
    pub fn inserted(&self) -> Notified<'_> {
        self.inserted.notified()
    }
}

impl<T> Default for TypedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// All pools a bootstrap run shares between its subsystems.
pub struct PoolsHolder {
    /// Shard headers and metablocks.
    pub headers: TypedPool<BlockHeader>,
    /// Mini-block bodies.
    pub mini_blocks: TypedPool<MiniBlock>,
    /// Raw trie-node bytes, keyed by content hash.
    pub trie_nodes: TypedPool<Vec<u8>>,
    /// Transactions observed on the gossip fabric.
    pub transactions: TypedPool<SignedTransaction>,
}

impl PoolsHolder {
    /// Fresh, empty pools.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            headers: TypedPool::new(),
            mini_blocks: TypedPool::new(),
            trie_nodes: TypedPool::new(),
            transactions: TypedPool::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_insert_wins() {
        let pool = TypedPool::new();
        let hash = Hash::compute(b"k");
        assert!(pool.insert(hash, 1u32));
        assert!(!pool.insert(hash, 2u32));
        assert_eq!(*pool.get(&hash).unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_wakes_enabled_waiter() {
        let pool = Arc::new(TypedPool::new());
        let hash = Hash::compute(b"k");

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let notified = pool.inserted();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if pool.get(&hash).is_none() {
                    notified.await;
                }
                pool.get(&hash).map(|value| *value)
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.insert(hash, 7u32);
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap(),
            Some(7)
        );
    }
}

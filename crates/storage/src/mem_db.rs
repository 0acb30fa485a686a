//! In-memory storage, used during bootstrap and in tests.

use crate::{KeyValueStore, StorageUnit, StorageUnitOpener, StoreResult};
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

/// An in-memory key/value store.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Every stored entry in key order.
    pub fn entries(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner.read().iter().map(|(key, value)| (key.clone(), value.clone())).collect()
    }
}

impl KeyValueStore for MemStore {
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.inner.read().contains_key(key))
    }
}

/// Opens in-memory units; the same unit always maps to the same store.
#[derive(Debug, Default)]
pub struct MemStorageOpener {
    units: Mutex<HashMap<StorageUnit, Arc<MemStore>>>,
}

impl MemStorageOpener {
    /// An opener with no units yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct handle to a unit's concrete store, for test assertions.
    pub fn unit(&self, unit: StorageUnit) -> Arc<MemStore> {
        Arc::clone(self.units.lock().entry(unit).or_default())
    }
}

impl StorageUnitOpener for MemStorageOpener {
    fn open(&self, unit: StorageUnit) -> StoreResult<Arc<dyn KeyValueStore>> {
        Ok(self.unit(unit))
    }
}

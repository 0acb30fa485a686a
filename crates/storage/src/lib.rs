// SPDX-License-Identifier: MIT or Apache-2.0
//! Persistent storage units and the trie storage manager.

mod latest;
pub mod mem_db;
mod trie_store;

pub use latest::*;
pub use mem_db::*;
pub use trie_store::*;

use kn_types::Epoch;
use std::sync::Arc;

/// Convenience type to propagate store errors.
pub type StoreResult<T> = eyre::Result<T>;

/// The named storage units the bootstrap engine writes on commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageUnit {
    /// Metachain blocks, keyed by epoch-start identifier or hash.
    MetaBlock,
    /// Bootstrap recovery data; duplicates the epoch-start metablock.
    Bootstrap,
    /// Shard headers keyed by hash.
    ShardHeader,
    /// Mini-block bodies keyed by hash.
    MiniBlock,
    /// Content-addressed trie nodes.
    Trie,
}

impl StorageUnit {
    /// Stable on-disk name of the unit.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MetaBlock => "meta_block",
            Self::Bootstrap => "bootstrap",
            Self::ShardHeader => "shard_header",
            Self::MiniBlock => "mini_block",
            Self::Trie => "trie",
        }
    }
}

/// Key under which an epoch's start metablock is stored.
pub fn epoch_start_key(epoch: Epoch) -> Vec<u8> {
    format!("epochStartBlock_{epoch}").into_bytes()
}

/// A flat key/value store backing one storage unit.
pub trait KeyValueStore: Send + Sync {
    /// Persist a value under a key, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;
    /// Read the value stored under a key.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
    /// True when a value is stored under the key.
    fn contains(&self, key: &[u8]) -> StoreResult<bool>;
}

/// Opens named storage units for the bootstrap commit path.
///
/// Repeated opens of the same unit return handles over the same data.
pub trait StorageUnitOpener: Send + Sync {
    /// Open (creating if needed) the given unit.
    fn open(&self, unit: StorageUnit) -> StoreResult<Arc<dyn KeyValueStore>>;
}

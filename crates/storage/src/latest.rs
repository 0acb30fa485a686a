//! Probe for the most recent durable checkpoint.

use crate::{KeyValueStore, StorageUnit, StorageUnitOpener, StoreResult};
use kn_types::{Epoch, Round, ShardId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key the latest-checkpoint record is stored under in the bootstrap unit.
pub const LATEST_DATA_KEY: &[u8] = b"latestStorageData";

/// What local storage knows about the last run of this node.
///
/// Read once at bootstrap start; never mutated after the local-vs-network
/// decision is made.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestStorageData {
    /// Shard the node last participated in.
    pub shard_id: ShardId,
    /// Shard count at the last checkpoint.
    pub num_shards: u32,
    /// Last round the node processed.
    pub last_round: i64,
    /// Round the last epoch started at.
    pub epoch_start_round: Round,
    /// Last epoch the node was part of.
    pub last_epoch: Epoch,
    /// True when the node was shuffled out of its shard.
    pub shuffled_out: bool,
    /// True when a checkpoint was actually found.
    pub storage_exists: bool,
}

/// Provides the latest durable checkpoint data.
pub trait LatestStorageDataProvider: Send + Sync {
    /// Probe storage for the most recent checkpoint.
    ///
    /// A missing checkpoint is not an error; it yields a record with
    /// `storage_exists == false`.
    fn probe(&self) -> StoreResult<LatestStorageData>;
}

/// Reads the checkpoint record the bootstrap commit path persisted.
pub struct StoredLatestDataProvider {
    bootstrap_unit: Arc<dyn KeyValueStore>,
}

impl StoredLatestDataProvider {
    /// A provider over the opener's bootstrap unit.
    pub fn new(opener: &dyn StorageUnitOpener) -> StoreResult<Self> {
        Ok(Self { bootstrap_unit: opener.open(StorageUnit::Bootstrap)? })
    }
}

impl LatestStorageDataProvider for StoredLatestDataProvider {
    fn probe(&self) -> StoreResult<LatestStorageData> {
        match self.bootstrap_unit.get(LATEST_DATA_KEY)? {
            Some(bytes) => {
                kn_types::decode(&bytes).map_err(|err| eyre::eyre!("corrupt checkpoint: {err}"))
            }
            None => Ok(LatestStorageData::default()),
        }
    }
}

//! Persists the assembled bootstrap bundle.

use crate::BootstrapResult;
use kn_storage::{
    epoch_start_key, LatestStorageData, StorageUnit, StorageUnitOpener, LATEST_DATA_KEY,
};
use kn_types::{
    encode, BlockHeader, EpochStartMetaBlock, Hash, MiniBlock, NodesCoordinatorRegistry, ShardHeader,
    ShardId,
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

/// Key under which an epoch's validator registry is stored.
pub fn nodes_config_key(epoch: kn_types::Epoch) -> Vec<u8> {
    format!("nodesCoordinatorRegistry_{epoch}").into_bytes()
}

/// Everything a successful network sync produced.
pub struct BootstrapComponents {
    /// The accepted epoch-start metablock.
    pub epoch_start_meta: EpochStartMetaBlock,
    /// The previous epoch's start metablock (possibly the synthesised
    /// placeholder right after genesis).
    pub prev_epoch_start: EpochStartMetaBlock,
    /// Our shard's last finalized header; `None` on the metachain branch.
    pub own_shard_header: Option<ShardHeader>,
    /// The derived validator registry.
    pub nodes_config: NodesCoordinatorRegistry,
    /// Every header synced during the run, by hash.
    pub headers: HashMap<Hash, BlockHeader>,
    /// Pending cross-shard mini-blocks; empty on the metachain branch.
    pub pending_mini_blocks: HashMap<Hash, MiniBlock>,
    /// The resolved self shard.
    pub self_shard_id: ShardId,
    /// Shard count of the new epoch.
    pub num_shards: u32,
}

/// Writes the bundle into the durable storage units.
///
/// The write layout is deterministic: identical components always produce
/// bit-identical persisted bytes.
pub struct StorageWriter {
    opener: Arc<dyn StorageUnitOpener>,
}

impl StorageWriter {
    /// A writer over the given unit opener.
    pub fn new(opener: Arc<dyn StorageUnitOpener>) -> Self {
        Self { opener }
    }

    /// Persist `components`, then the checkpoint record later restarts probe.
    pub fn save(&self, components: &BootstrapComponents) -> BootstrapResult<()> {
        let epoch = components.epoch_start_meta.epoch;
        let meta_unit = self.opener.open(StorageUnit::MetaBlock)?;
        let bootstrap_unit = self.opener.open(StorageUnit::Bootstrap)?;
        let header_unit = self.opener.open(StorageUnit::ShardHeader)?;
        let mini_block_unit = self.opener.open(StorageUnit::MiniBlock)?;

        // the epoch-start metablock lands in both units: MetaBlock is the
        // chain view, Bootstrap the recovery trigger
        let meta_bytes = encode(&components.epoch_start_meta);
        let key = epoch_start_key(epoch);
        meta_unit.put(&key, &meta_bytes)?;
        bootstrap_unit.put(&key, &meta_bytes)?;

        let prev_key = epoch_start_key(components.prev_epoch_start.epoch);
        meta_unit.put(&prev_key, &encode(&components.prev_epoch_start))?;

        bootstrap_unit.put(&nodes_config_key(epoch), &encode(&components.nodes_config))?;

        // deterministic iteration keeps re-runs bit-identical
        let mut header_hashes: Vec<&Hash> = components.headers.keys().collect();
        header_hashes.sort_unstable();
        for hash in header_hashes {
            header_unit.put(hash.as_ref(), &encode(&components.headers[hash]))?;
        }

        let mut mini_block_hashes: Vec<&Hash> = components.pending_mini_blocks.keys().collect();
        mini_block_hashes.sort_unstable();
        for hash in mini_block_hashes {
            mini_block_unit.put(hash.as_ref(), &encode(&components.pending_mini_blocks[hash]))?;
        }
        debug!(
            target: "bootstrap::storage",
            headers = components.headers.len(),
            mini_blocks = components.pending_mini_blocks.len(),
            "bundle persisted"
        );

        let checkpoint = LatestStorageData {
            shard_id: components.self_shard_id,
            num_shards: components.num_shards,
            last_round: components.epoch_start_meta.round as i64,
            epoch_start_round: components.epoch_start_meta.round,
            last_epoch: epoch,
            shuffled_out: false,
            storage_exists: true,
        };
        bootstrap_unit.put(LATEST_DATA_KEY, &encode(&checkpoint))?;

        info!(target: "bootstrap::storage", epoch, shard = components.self_shard_id, "bootstrap commit complete");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/storage_handler_tests.rs"]
mod storage_handler_tests;

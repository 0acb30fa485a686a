//! Synchronises pending cross-shard mini-blocks.

use crate::{
    sync::collect_by_hash, BootstrapError, BootstrapResult, PoolsHolder, RequestCoordinator, Topic,
};
use kn_types::{Hash, MiniBlock, MiniBlockHeader, Noticer};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;

/// Pulls mini-block bodies listed in epoch-start shard data.
pub struct PendingMiniBlocksSyncer {
    pools: Arc<PoolsHolder>,
    coordinator: Arc<RequestCoordinator>,
    cadence: Duration,
    collected: Mutex<HashMap<Hash, MiniBlock>>,
    synced: AtomicBool,
}

impl PendingMiniBlocksSyncer {
    /// A syncer collecting from the shared mini-block pool.
    pub fn new(
        pools: Arc<PoolsHolder>,
        coordinator: Arc<RequestCoordinator>,
        cadence: Duration,
    ) -> Self {
        Self {
            pools,
            coordinator,
            cadence,
            collected: Mutex::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Fetch the bodies of all `pending`, failing with the missing set on
    /// `timeout`.
    pub async fn sync_pending_mini_blocks(
        &self,
        pending: &[MiniBlockHeader],
        timeout: Duration,
        shutdown: &Noticer,
    ) -> BootstrapResult<()> {
        let hashes: Vec<Hash> = pending.iter().map(|header| header.hash).collect();
        debug!(target: "bootstrap::sync", count = hashes.len(), "syncing pending mini blocks");

        let request = |missing: &[Hash]| {
            // a mini-block is served by its sender shard
            for header in pending.iter().filter(|header| missing.contains(&header.hash)) {
                self.coordinator.request(Topic::MiniBlocks(header.sender_shard), &[header.hash])?;
            }
            Ok(())
        };

        let found = collect_by_hash(
            &self.pools.mini_blocks,
            &hashes,
            request,
            self.cadence,
            timeout,
            shutdown,
        )
        .await?;

        {
            let mut collected = self.collected.lock();
            for (hash, mini_block) in found {
                collected.insert(hash, (*mini_block).clone());
            }
        }
        self.synced.store(true, Ordering::Release);
        Ok(())
    }

    /// The mini-blocks gathered by the last completed sync.
    pub fn mini_blocks(&self) -> BootstrapResult<HashMap<Hash, MiniBlock>> {
        if !self.synced.load(Ordering::Acquire) {
            return Err(BootstrapError::InvalidConfiguration(
                "mini blocks requested before any sync completed".to_string(),
            ));
        }
        Ok(self.collected.lock().clone())
    }

    /// Reset for reuse.
    pub fn clear_fields(&self) {
        self.collected.lock().clear();
        self.synced.store(false, Ordering::Release);
    }
}

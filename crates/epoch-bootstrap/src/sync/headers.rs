//! Synchronises block headers by hash.

use crate::{
    sync::collect_by_hash, BootstrapError, BootstrapResult, PoolsHolder, RequestCoordinator, Topic,
};
use kn_types::{BlockHeader, Hash, Noticer, ShardId, METACHAIN_SHARD_ID};
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

/// Pulls a set of headers, identified by `(shard, hash)`, from the network.
///
/// Reusable: `clear_fields` resets all cross-call state.
pub struct HeadersByHashSyncer {
    pools: Arc<PoolsHolder>,
    coordinator: Arc<RequestCoordinator>,
    cadence: Duration,
    collected: Mutex<HashMap<Hash, BlockHeader>>,
    synced: AtomicBool,
}

impl HeadersByHashSyncer {
    /// A syncer collecting from the shared header pool.
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

    /// Fetch all `targets`, failing with the missing set on `timeout`.
    pub async fn sync_missing_headers(
        &self,
        targets: &[(ShardId, Hash)],
        timeout: Duration,
        shutdown: &Noticer,
    ) -> BootstrapResult<()> {
        let hashes: Vec<Hash> = targets.iter().map(|(_, hash)| *hash).collect();
        debug!(target: "bootstrap::sync", count = hashes.len(), "syncing headers by hash");

        let request = |missing: &[Hash]| {
            // group the re-request by the shard topic each header lives on
            for shard in shards_of(targets, missing) {
                let batch: Vec<Hash> = targets
                    .iter()
                    .filter(|(header_shard, hash)| *header_shard == shard && missing.contains(hash))
                    .map(|(_, hash)| *hash)
                    .collect();
                let topic = if shard == METACHAIN_SHARD_ID {
                    Topic::MetaHeaders
                } else {
                    Topic::ShardHeaders(shard)
                };
                self.coordinator.request(topic, &batch)?;
            }
            Ok(())
        };

        let found = collect_by_hash(
            &self.pools.headers,
            &hashes,
            request,
            self.cadence,
            timeout,
            shutdown,
        )
        .await?;

        {
            let mut collected = self.collected.lock();
            for (hash, header) in found {
                collected.insert(hash, (*header).clone());
            }
        }
        self.synced.store(true, Ordering::Release);
        Ok(())
    }

    /// The headers gathered by the last completed sync.
    ///
    /// A successful `sync_missing_headers` always leaves the full requested
    /// set here; callers never see a partial result.
    pub fn headers(&self) -> BootstrapResult<HashMap<Hash, BlockHeader>> {
        if !self.synced.load(Ordering::Acquire) {
            return Err(BootstrapError::InvalidConfiguration(
                "headers requested before any sync completed".to_string(),
            ));
        }
        Ok(self.collected.lock().clone())
    }

    /// Reset for reuse; no cross-call state survives.
    pub fn clear_fields(&self) {
        self.collected.lock().clear();
        self.synced.store(false, Ordering::Release);
    }
}

fn shards_of(targets: &[(ShardId, Hash)], missing: &[Hash]) -> Vec<ShardId> {
    let mut shards: Vec<ShardId> = targets
        .iter()
        .filter(|(_, hash)| missing.contains(hash))
        .map(|(shard, _)| *shard)
        .collect();
    shards.sort_unstable();
    shards.dedup();
    shards
}

#[cfg(test)]
#[path = "../tests/headers_sync_tests.rs"]
mod headers_sync_tests;

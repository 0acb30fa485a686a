//! Parallel reconstruction of a Merkle-Patricia trie from the network.

use crate::{BootstrapError, BootstrapResult, PoolsHolder, RequestCoordinator, Topic};
use kn_config::{TrieSyncConfig, TrieSyncerVersion};
use kn_storage::TrieStorageManager;
use kn_types::{Hash, Noticer, ShardId, TrieNode};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinSet,
};
use tracing::{debug, info, warn};

/// What a verification worker concluded about one received node.
enum WorkerOutcome {
    /// Hash checked out and the node parsed; children listed.
    Verified { hash: Hash, level: u8, bytes: Vec<u8>, children: Vec<Hash> },
    /// The payload does not hash to the expected value or does not parse.
    Mismatch { hash: Hash, level: u8 },
}

/// Arguments for building a [TrieSyncer].
pub struct TrieSyncerArgs {
    /// Storage the reconstructed trie lands in.
    pub storage: Arc<dyn TrieStorageManager>,
    /// Pools trie nodes arrive through.
    pub pools: Arc<PoolsHolder>,
    /// Coordinator requests are issued through.
    pub coordinator: Arc<RequestCoordinator>,
    /// Shard whose trie-node topic is requested on.
    pub shard_id: ShardId,
    /// Trie-sync tuning.
    pub config: TrieSyncConfig,
    /// Depth kept in the interim cache under version 2.
    pub max_level_in_memory: u8,
    /// Cadence for re-requesting missing nodes.
    pub request_cadence: Duration,
    /// Cancellation signal from the driver.
    pub shutdown: Noticer,
}

/// Reconstructs the sub-DAG under a root hash with bounded concurrency.
///
/// A frontier of requested-but-absent hashes is chased breadth-first; a
/// semaphore of `num_concurrent_trie_syncers` permits bounds in-flight
/// verification work. The sync succeeds only when every reachable node is
/// resident in the storage manager.
pub struct TrieSyncer {
    storage: Arc<dyn TrieStorageManager>,
    pools: Arc<PoolsHolder>,
    coordinator: Arc<RequestCoordinator>,
    shard_id: ShardId,
    config: TrieSyncConfig,
    max_level_in_memory: u8,
    request_cadence: Duration,
    shutdown: Noticer,
}

impl TrieSyncer {
    /// Validate the arguments and build a syncer.
    pub fn new(args: TrieSyncerArgs) -> BootstrapResult<Self> {
        if args.config.num_concurrent_trie_syncers == 0 {
            return Err(BootstrapError::InvalidConfiguration(
                "num_concurrent_trie_syncers must be positive".to_string(),
            ));
        }
        if args.config.max_hard_cap_for_missing_nodes == 0 {
            return Err(BootstrapError::InvalidConfiguration(
                "max_hard_cap_for_missing_nodes must be positive".to_string(),
            ));
        }
        Ok(Self {
            storage: args.storage,
            pools: args.pools,
            coordinator: args.coordinator,
            shard_id: args.shard_id,
            config: args.config,
            max_level_in_memory: args.max_level_in_memory,
            request_cadence: args.request_cadence,
            shutdown: args.shutdown,
        })
    }

    /// Fetch, verify and store every node reachable from `root`.
    pub async fn sync_trie(&self, root: Hash) -> BootstrapResult<()> {
        if root.is_zero() {
            debug!(target: "bootstrap::trie_sync", "empty root, nothing to sync");
            return Ok(());
        }
        if self.storage.contains(&root)? {
            debug!(target: "bootstrap::trie_sync", ?root, "trie already resident");
            self.storage.take_snapshot(&root);
            return Ok(());
        }

        info!(target: "bootstrap::trie_sync", ?root, shard = self.shard_id, "trie sync started");

        // frontier of requested-but-unprocessed hashes, with their depth
        let mut pending: HashMap<Hash, u8> = HashMap::new();
        pending.insert(root, 0);
        // verified nodes retained in memory until the final flush
        let mut interim: HashMap<Hash, Vec<u8>> = HashMap::new();
        let mut rerequests = 0usize;
        let mut received = 0u64;

        let semaphore = Arc::new(Semaphore::new(self.config.num_concurrent_trie_syncers));
        let mut workers: JoinSet<WorkerOutcome> = JoinSet::new();

        self.request(&[root])?;

        let node_timeout = self.config.timeout_getting_trie_node;
        let deadline = tokio::time::sleep(node_timeout);
        tokio::pin!(deadline);
        let rerequest_tick = tokio::time::sleep(self.request_cadence);
        tokio::pin!(rerequest_tick);

        loop {
            // register before polling the pool so a racing insert is not lost
            let inserted = self.pools.trie_nodes.inserted();
            tokio::pin!(inserted);
            inserted.as_mut().enable();

            // dispatch every received node a permit is available for
            let ready: Vec<(Hash, u8)> = pending
                .iter()
                .filter(|(hash, _)| self.pools.trie_nodes.contains(hash))
                .map(|(hash, level)| (*hash, *level))
                .collect();
            let mut dispatched = false;
            for (hash, level) in ready {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else { break };
                let Some(bytes) = self.pools.trie_nodes.get(&hash) else { continue };
                pending.remove(&hash);
                dispatched = true;
                received += 1;
                // every reception pushes the no-progress deadline out
                deadline.as_mut().reset(tokio::time::Instant::now() + node_timeout);
                workers.spawn(verify_node(hash, level, bytes, permit));
            }
            if dispatched {
                continue;
            }

            if pending.is_empty() && workers.is_empty() {
                info!(target: "bootstrap::trie_sync", ?root, nodes = received, "trie sync complete");
                return self.flush(root, interim);
            }

            tokio::select! {
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            drain(&mut workers).await;
                            return Err(BootstrapError::IntegrityViolation(format!(
                                "trie verification worker failed: {err}"
                            )));
                        }
                    };
                    match outcome {
                        WorkerOutcome::Verified { hash, level, bytes, children } => {
                            if self.spills(level) {
                                self.storage.put(&hash, &bytes)?;
                            } else {
                                interim.insert(hash, bytes);
                            }
                            let mut fresh = Vec::new();
                            for child in children {
                                if pending.contains_key(&child) || interim.contains_key(&child) {
                                    continue;
                                }
                                if self.storage.contains(&child)? {
                                    continue;
                                }
                                pending.insert(child, level.saturating_add(1));
                                fresh.push(child);
                            }
                            if !fresh.is_empty() {
                                self.request(&fresh)?;
                            }
                        }
                        WorkerOutcome::Mismatch { hash, level } => {
                            // a payload that does not match its key cannot
                            // come through the interceptor; evict it and
                            // fetch the node again
                            warn!(target: "bootstrap::trie_sync", ?hash, "trie node failed verification");
                            self.pools.trie_nodes.remove(&hash);
                            pending.insert(hash, level);
                        }
                    }
                }
                _ = &mut inserted => {}
                _ = &mut rerequest_tick => {
                    let missing: Vec<Hash> = pending
                        .keys()
                        .filter(|hash| !self.pools.trie_nodes.contains(hash))
                        .copied()
                        .collect();
                    if !missing.is_empty() {
                        rerequests += missing.len();
                        if rerequests > self.config.max_hard_cap_for_missing_nodes {
                            drain(&mut workers).await;
                            warn!(
                                target: "bootstrap::trie_sync",
                                budget = self.config.max_hard_cap_for_missing_nodes,
                                still_missing = missing.len(),
                                "trie sync stalled"
                            );
                            return Err(BootstrapError::TrieSyncStalled {
                                budget: self.config.max_hard_cap_for_missing_nodes,
                            });
                        }
                        self.request(&missing)?;
                    }
                    rerequest_tick
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.request_cadence);
                }
                _ = &mut deadline => {
                    drain(&mut workers).await;
                    return Err(BootstrapError::Timeout {
                        missing: pending.keys().copied().collect(),
                    });
                }
                _ = self.shutdown.notified() => {
                    drain(&mut workers).await;
                    return Err(BootstrapError::Cancelled);
                }
            }
        }
    }

    /// True when a node at `level` goes straight to storage instead of the
    /// interim cache.
    fn spills(&self, level: u8) -> bool {
        self.config.trie_syncer_version == TrieSyncerVersion::V2
            && level > self.max_level_in_memory
    }

    fn request(&self, hashes: &[Hash]) -> BootstrapResult<()> {
        self.coordinator.request(Topic::TrieNodes(self.shard_id), hashes)
    }

    fn flush(&self, root: Hash, interim: HashMap<Hash, Vec<u8>>) -> BootstrapResult<()> {
        for (hash, bytes) in &interim {
            self.storage.put(hash, bytes)?;
        }
        self.storage.take_snapshot(&root);
        Ok(())
    }
}

/// Verify one received node and extract its children.
async fn verify_node(
    hash: Hash,
    level: u8,
    bytes: Arc<Vec<u8>>,
    permit: OwnedSemaphorePermit,
) -> WorkerOutcome {
    let outcome = if Hash::compute(&bytes) != hash {
        WorkerOutcome::Mismatch { hash, level }
    } else {
        match TrieNode::from_bytes(&bytes) {
            Ok(node) => WorkerOutcome::Verified {
                hash,
                level,
                bytes: (*bytes).clone(),
                children: node.child_hashes(),
            },
            Err(_) => WorkerOutcome::Mismatch { hash, level },
        }
    };
    drop(permit);
    outcome
}

/// Let in-flight verifications finish before returning a fatal error.
async fn drain(workers: &mut JoinSet<WorkerOutcome>) {
    while workers.join_next().await.is_some() {}
}

#[cfg(test)]
#[path = "../tests/trie_sync_tests.rs"]
mod trie_sync_tests;

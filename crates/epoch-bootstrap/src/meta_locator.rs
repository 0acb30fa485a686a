//! Locates the current epoch-start metablock via a quorum of peer answers.

use crate::{BootstrapError, BootstrapResult, PoolsHolder, RequestCoordinator};
use kn_types::{EpochStartMetaBlock, Hash, Noticer};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Counts how many distinct peers answered with each candidate hash.
///
/// Written by the metachain header interceptor, read by the locator. Only
/// records while a locator run is active; outside that window unsolicited
/// epoch-start metablocks are dropped at the interceptor.
#[derive(Default)]
pub struct CandidateTallies {
    peers_by_hash: Mutex<HashMap<Hash, HashSet<String>>>,
    active: AtomicBool,
    updated: Notify,
}

impl CandidateTallies {
    /// A fresh, inactive tally sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True while a locator run is collecting candidates.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record that `peer` served the candidate with `hash`.
    pub fn record(&self, hash: Hash, peer: &str) {
        if !self.is_active() {
            return;
        }
        self.peers_by_hash.lock().entry(hash).or_default().insert(peer.to_string());
        self.updated.notify_waiters();
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        if !active {
            self.peers_by_hash.lock().clear();
        }
    }

    fn counts(&self) -> Vec<(Hash, usize)> {
        self.peers_by_hash
            .lock()
            .iter()
            .map(|(hash, peers)| (*hash, peers.len()))
            .collect()
    }
}

/// Resolves the network's current epoch-start metablock.
pub struct EpochStartMetaLocator {
    coordinator: Arc<RequestCoordinator>,
    pools: Arc<PoolsHolder>,
    tallies: Arc<CandidateTallies>,
    quorum: usize,
    rebroadcast_interval: Duration,
}

impl EpochStartMetaLocator {
    /// How often the epoch-start request is re-broadcast while searching.
    const DEFAULT_REBROADCAST: Duration = Duration::from_secs(1);

    /// A locator requiring `quorum` identical peer answers.
    pub fn new(
        coordinator: Arc<RequestCoordinator>,
        pools: Arc<PoolsHolder>,
        tallies: Arc<CandidateTallies>,
        quorum: usize,
    ) -> Self {
        Self {
            coordinator,
            pools,
            tallies,
            quorum: quorum.max(1),
            rebroadcast_interval: Self::DEFAULT_REBROADCAST,
        }
    }

    /// Broadcast the epoch-start request and wait for a quorum-confirmed
    /// metablock.
    ///
    /// Candidates arrive through the metachain header interceptor, which has
    /// already enforced header integrity; the locator only judges quorum and
    /// breaks ties by highest epoch, then highest nonce, then smallest hash.
    pub async fn sync_epoch_start_meta(
        &self,
        timeout: Duration,
        shutdown: &Noticer,
    ) -> BootstrapResult<EpochStartMetaBlock> {
        self.tallies.set_active(true);
        let result = self.locate(timeout, shutdown).await;
        self.tallies.set_active(false);
        result
    }

    async fn locate(
        &self,
        timeout: Duration,
        shutdown: &Noticer,
    ) -> BootstrapResult<EpochStartMetaBlock> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        self.coordinator.request_epoch_start_meta()?;

        loop {
            let updated = self.tallies.updated.notified();
            tokio::pin!(updated);
            updated.as_mut().enable();

            if let Some(meta) = self.confirmed_candidate() {
                debug!(
                    target: "bootstrap::meta_locator",
                    epoch = meta.epoch, nonce = meta.nonce, "epoch start metablock confirmed"
                );
                return Ok(meta);
            }

            tokio::select! {
                _ = &mut updated => {}
                _ = tokio::time::sleep(self.rebroadcast_interval) => {
                    self.coordinator.request_epoch_start_meta()?;
                }
                _ = &mut deadline => {
                    warn!(target: "bootstrap::meta_locator", quorum = self.quorum, "no epoch start metablock reached quorum");
                    return Err(BootstrapError::PeerQuorumFailed { quorum: self.quorum });
                }
                _ = shutdown.notified() => return Err(BootstrapError::Cancelled),
            }
        }
    }

    /// The best candidate meeting the quorum, if any.
    fn confirmed_candidate(&self) -> Option<EpochStartMetaBlock> {
        let mut best: Option<(EpochStartMetaBlock, Hash)> = None;
        for (hash, count) in self.tallies.counts() {
            if count < self.quorum {
                continue;
            }
            let Some(header) = self.pools.headers.get(&hash) else { continue };
            let Some(meta) = header.as_meta() else { continue };
            let better = match &best {
                None => true,
                Some((current, current_hash)) => {
                    (meta.epoch, meta.nonce, std::cmp::Reverse(hash))
                        > (current.epoch, current.nonce, std::cmp::Reverse(*current_hash))
                }
            };
            if better {
                best = Some((meta.clone(), hash));
            }
        }
        best.map(|(meta, _)| meta)
    }
}

#[cfg(test)]
#[path = "tests/meta_locator_tests.rs"]
mod meta_locator_tests;

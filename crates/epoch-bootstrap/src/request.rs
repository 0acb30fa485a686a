//! Outbound request coordination and the interceptor admission whitelist.

use crate::{BootstrapResult, Messenger, RequestMessage, Topic, EPOCH_START_REQUEST_TOPIC};
use kn_config::{RequestConfig, WhitelistConfig};
use kn_types::{encode, Hash};
use lru::LruCache;
use parking_lot::Mutex;
use std::{num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Transient set of hashes the interceptors will admit from gossip.
///
/// Bounded LRU; inserting into a full cache evicts the least recently used
/// entry. Admission refreshes the entry's TTL.
pub struct WhitelistHandler {
    cache: Mutex<LruCache<Hash, Instant>>,
    ttl: Duration,
}

impl WhitelistHandler {
    /// A whitelist sized and aged per `config`.
    pub fn new(config: &WhitelistConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("non-zero capacity");
        Self { cache: Mutex::new(LruCache::new(capacity)), ttl: config.ttl }
    }

    /// Whitelist the given hashes for one TTL window.
    pub fn add(&self, hashes: &[Hash]) {
        let expiry = Instant::now() + self.ttl;
        let mut cache = self.cache.lock();
        for hash in hashes {
            cache.put(*hash, expiry);
        }
    }

    /// True when `hash` is currently whitelisted; a hit extends the TTL.
    pub fn admit(&self, hash: &Hash) -> bool {
        let mut cache = self.cache.lock();
        match cache.get_mut(hash) {
            Some(expiry) if *expiry > Instant::now() => {
                *expiry = Instant::now() + self.ttl;
                true
            }
            Some(_) => {
                cache.pop(hash);
                false
            }
            None => false,
        }
    }

    /// Number of live entries (expired ones included until next touch).
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// True when no entry is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

/// Rate-limits and batches outbound pull requests.
pub struct RequestCoordinator {
    messenger: Arc<dyn Messenger>,
    whitelist: Arc<WhitelistHandler>,
    recent: Mutex<lru::LruCache<Hash, Instant>>,
    config: RequestConfig,
}

impl RequestCoordinator {
    /// Size of the request de-duplication window cache.
    const RECENT_CAPACITY: usize = 10_000;

    /// A coordinator publishing through `messenger`.
    pub fn new(
        messenger: Arc<dyn Messenger>,
        whitelist: Arc<WhitelistHandler>,
        config: RequestConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(Self::RECENT_CAPACITY).expect("non-zero capacity");
        Self { messenger, whitelist, recent: Mutex::new(LruCache::new(capacity)), config }
    }

    /// The whitelist interceptors consult.
    pub fn whitelist(&self) -> &Arc<WhitelistHandler> {
        &self.whitelist
    }

    /// Whitelist `hashes` and request them on `topic`.
    ///
    /// Hashes requested within the last `time_between_requests` are dropped;
    /// the rest go out in batches of at most `max_to_request`.
    pub fn request(&self, topic: Topic, hashes: &[Hash]) -> BootstrapResult<()> {
        self.whitelist.add(hashes);

        let now = Instant::now();
        let fresh: Vec<Hash> = {
            let mut recent = self.recent.lock();
            hashes
                .iter()
                .filter(|hash| {
                    match recent.get(*hash) {
                        Some(last) if now.duration_since(*last) < self.config.time_between_requests => {
                            false
                        }
                        _ => {
                            recent.put(**hash, now);
                            true
                        }
                    }
                })
                .copied()
                .collect()
        };

        if fresh.is_empty() {
            trace!(target: "bootstrap::request", topic = %topic.name(), "all hashes within request window");
            return Ok(());
        }

        let topic_name = topic.request_name();
        for chunk in fresh.chunks(self.config.max_to_request) {
            debug!(target: "bootstrap::request", topic = %topic_name, count = chunk.len(), "requesting hashes");
            let message = RequestMessage { hashes: chunk.to_vec() };
            self.messenger.broadcast(&topic_name, &encode(&message))?;
        }
        Ok(())
    }

    /// Broadcast a request for the current epoch-start metablock.
    ///
    /// Not de-duplicated: the locator re-broadcasts on its own cadence and
    /// there is no hash to key a window on.
    pub fn request_epoch_start_meta(&self) -> BootstrapResult<()> {
        debug!(target: "bootstrap::request", "requesting current epoch start metablock");
        self.messenger.broadcast(EPOCH_START_REQUEST_TOPIC, &encode(&RequestMessage::default()))
    }
}

#[cfg(test)]
#[path = "tests/request_tests.rs"]
mod request_tests;

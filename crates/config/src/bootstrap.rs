//! Configuration for the epoch-start fast-bootstrap engine.

use kn_types::{Epoch, Round, ShardId, DISABLED_OBSERVER_SHARD};
use std::time::Duration;

/// The container for everything the bootstrap engine can be tuned with.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Disable to skip the network phase and start from local state only.
    pub start_in_epoch_enabled: bool,
    /// Number of rounds per epoch; denominator of the freshness test.
    pub rounds_per_epoch: u64,
    /// Rounds within which local storage counts as current.
    pub round_grace_period: u64,
    /// Fraction of an epoch granted past the epoch end before storage goes stale.
    pub grace_fraction: f64,
    /// Deadline for each network sync phase.
    pub time_to_wait: Duration,
    /// Shard the node observes when it is not an active validator.
    pub destination_shard_as_observer: ShardId,
    /// Minimum identical peer answers before an epoch-start metablock is accepted.
    pub min_num_connected_peers_to_start: usize,
    /// Epoch from which transaction signatures cover the tx hash instead of
    /// the raw encoding.
    pub tx_signed_with_hash_enable_epoch: Epoch,
    /// Request coordinator tuning.
    pub requests: RequestConfig,
    /// Whitelist cache tuning.
    pub whitelist: WhitelistConfig,
    /// Trie synchroniser tuning.
    pub trie_sync: TrieSyncConfig,
    /// Seed base data from a hardfork checkpoint instead of probing storage.
    pub hardfork: HardforkConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            start_in_epoch_enabled: true,
            rounds_per_epoch: 14_400,
            round_grace_period: 25,
            grace_fraction: 0.25,
            time_to_wait: Duration::from_secs(60),
            destination_shard_as_observer: DISABLED_OBSERVER_SHARD,
            min_num_connected_peers_to_start: 2,
            tx_signed_with_hash_enable_epoch: Epoch::MAX,
            requests: RequestConfig::default(),
            whitelist: WhitelistConfig::default(),
            trie_sync: TrieSyncConfig::default(),
            hardfork: HardforkConfig::default(),
        }
    }
}

/// Tuning for outbound request batching and de-duplication.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Window within which a repeated request for the same hash is dropped.
    pub time_between_requests: Duration,
    /// Maximum hashes per outbound request batch.
    pub max_to_request: usize,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { time_between_requests: Duration::from_millis(100), max_to_request: 100 }
    }
}

/// Tuning for the interceptor admission whitelist.
#[derive(Debug, Clone)]
pub struct WhitelistConfig {
    /// Maximum number of whitelisted hashes held at once.
    pub capacity: usize,
    /// How long an entry admits messages; refreshed on every admission.
    pub ttl: Duration,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self { capacity: 100_000, ttl: Duration::from_secs(60) }
    }
}

/// Selects the trie synchronisation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrieSyncerVersion {
    /// Hold every received node in memory until the sync completes.
    V1,
    /// Spill nodes below the in-memory level threshold straight to storage.
    V2,
}

/// Tuning for the parallel trie synchroniser.
#[derive(Debug, Clone)]
pub struct TrieSyncConfig {
    /// Number of concurrent node-verification workers.
    pub num_concurrent_trie_syncers: usize,
    /// Total re-request budget across one trie sync.
    pub max_hard_cap_for_missing_nodes: usize,
    /// Strategy version.
    pub trie_syncer_version: TrieSyncerVersion,
    /// Trie depth kept in memory for the user-accounts trie (V2 only).
    pub max_state_trie_level_in_memory: u8,
    /// Trie depth kept in memory for the peer-accounts trie (V2 only).
    pub max_peer_trie_level_in_memory: u8,
    /// No-progress deadline; reset on every received node.
    pub timeout_getting_trie_node: Duration,
}

impl Default for TrieSyncConfig {
    fn default() -> Self {
        Self {
            num_concurrent_trie_syncers: 8,
            max_hard_cap_for_missing_nodes: 5_000,
            trie_syncer_version: TrieSyncerVersion::V2,
            max_state_trie_level_in_memory: 5,
            max_peer_trie_level_in_memory: 5,
            timeout_getting_trie_node: Duration::from_secs(60),
        }
    }
}

/// Hardfork checkpoint the node restarts from.
#[derive(Debug, Clone, Default)]
pub struct HardforkConfig {
    /// True when the chain restarted from a hardfork export.
    pub after_hardfork: bool,
    /// Epoch of the hardfork checkpoint.
    pub start_epoch: Epoch,
    /// Round of the hardfork checkpoint.
    pub start_round: Round,
}

//! Derivation of the per-epoch validator registry and the node's own shard.

use kn_config::GenesisSetup;
use kn_types::{
    encode, Epoch, EpochStartMetaBlock, Hash, NodesCoordinatorRegistry, ShardId, Validator,
    ValidatorPubKey, DISABLED_OBSERVER_SHARD, METACHAIN_SHARD_ID,
};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::BTreeMap;
use tracing::debug;

/// Deterministically reassigns validators to shards for a new epoch.
///
/// The same `(epoch, eligible, waiting, seed)` must always produce the same
/// registry, on every node.
pub trait NodeShuffler: Send + Sync {
    /// Produce the registry for `epoch`.
    fn shuffle(
        &self,
        epoch: Epoch,
        eligible: &BTreeMap<ShardId, Vec<Validator>>,
        waiting: &BTreeMap<ShardId, Vec<Validator>>,
        seed: &Hash,
    ) -> NodesCoordinatorRegistry;
}

/// Shuffler drawing from a seeded RNG; preserves every shard's eligible and
/// waiting list sizes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SeededShuffler;

impl NodeShuffler for SeededShuffler {
    fn shuffle(
        &self,
        epoch: Epoch,
        eligible: &BTreeMap<ShardId, Vec<Validator>>,
        waiting: &BTreeMap<ShardId, Vec<Validator>>,
        seed: &Hash,
    ) -> NodesCoordinatorRegistry {
        // one pool over both roles, in stable shard order
        let mut pool: Vec<Validator> = Vec::new();
        for validators in eligible.values().chain(waiting.values()) {
            pool.extend(validators.iter().copied());
        }
        let mut rng = StdRng::from_seed(*seed.as_bytes());
        pool.shuffle(&mut rng);

        // refill both role maps with the original per-shard counts
        let mut drained = pool.into_iter();
        let refill = |layout: &BTreeMap<ShardId, Vec<Validator>>,
                      drained: &mut std::vec::IntoIter<Validator>| {
            layout
                .iter()
                .map(|(shard, validators)| {
                    (*shard, drained.by_ref().take(validators.len()).collect())
                })
                .collect::<BTreeMap<ShardId, Vec<Validator>>>()
        };
        let shuffled_eligible = refill(eligible, &mut drained);
        let shuffled_waiting = refill(waiting, &mut drained);

        NodesCoordinatorRegistry {
            current_epoch: epoch,
            eligible: shuffled_eligible,
            waiting: shuffled_waiting,
        }
    }
}

/// Derive the registry for the epoch started by `current`.
///
/// The shuffle seed binds both consecutive epoch-start metablocks, so every
/// node reaching the same checkpoint derives bit-identical assignments.
pub fn derive_nodes_config(
    genesis: &GenesisSetup,
    shuffler: &dyn NodeShuffler,
    current: &EpochStartMetaBlock,
    previous: &EpochStartMetaBlock,
) -> NodesCoordinatorRegistry {
    let seed = Hash::compute(&encode(&(current.hash(), previous.hash())));
    debug!(target: "bootstrap::nodes_config", epoch = current.epoch, ?seed, "deriving registry");
    shuffler.shuffle(current.epoch, &genesis.eligible, &genesis.waiting, &seed)
}

/// Where this node belongs for the new epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelfShardResolution {
    /// The resolved shard.
    pub shard_id: ShardId,
    /// True when the own key is part of the registry.
    pub is_validator: bool,
}

/// Resolve the node's own shard against a derived registry.
///
/// A key present in the registry pins the node to that shard. Otherwise the
/// node observes `destination_shard_as_observer` when that is a valid shard,
/// falling back to the genesis assignment.
pub fn resolve_self_shard(
    registry: &NodesCoordinatorRegistry,
    own_key: &ValidatorPubKey,
    destination_shard_as_observer: ShardId,
    num_shards: u32,
    genesis_shard: ShardId,
) -> SelfShardResolution {
    if let Some(shard_id) = registry.shard_of(own_key) {
        return SelfShardResolution { shard_id, is_validator: true };
    }

    let mut shard_id = destination_shard_as_observer;
    let invalid = shard_id == DISABLED_OBSERVER_SHARD
        || (shard_id >= num_shards && shard_id != METACHAIN_SHARD_ID);
    if invalid {
        shard_id = genesis_shard;
    }
    SelfShardResolution { shard_id, is_validator: false }
}

/// For observers with a configured destination shard, the configured value
/// wins over whatever was derived.
pub fn apply_observer_override(
    derived: ShardId,
    destination_shard_as_observer: ShardId,
    is_validator: bool,
) -> ShardId {
    if !is_validator
        && destination_shard_as_observer != DISABLED_OBSERVER_SHARD
        && destination_shard_as_observer != derived
    {
        debug!(
            target: "bootstrap::nodes_config",
            destination = destination_shard_as_observer, derived, "observer shard override applied"
        );
        return destination_shard_as_observer;
    }
    derived
}

#[cfg(test)]
#[path = "tests/nodes_config_tests.rs"]
mod nodes_config_tests;

//! Genesis network setup consumed by the bootstrap engine.

use kn_types::{ShardId, Validator, ValidatorPubKey};
use std::collections::BTreeMap;

/// The network as configured at genesis.
#[derive(Debug, Clone)]
pub struct GenesisSetup {
    /// Chain identifier every header must carry.
    pub chain_id: String,
    /// Unix timestamp of the first round.
    pub start_time: u64,
    /// Number of account shards at genesis.
    pub num_shards: u32,
    /// The shard this node was assigned at genesis.
    pub self_shard_id: ShardId,
    /// Initial eligible validators per shard.
    pub eligible: BTreeMap<ShardId, Vec<Validator>>,
    /// Initial waiting validators per shard.
    pub waiting: BTreeMap<ShardId, Vec<Validator>>,
}

impl GenesisSetup {
    /// True when `key` appears in any genesis eligible or waiting list.
    pub fn contains_key(&self, key: &ValidatorPubKey) -> bool {
        self.eligible
            .values()
            .chain(self.waiting.values())
            .flatten()
            .any(|validator| &validator.pub_key == key)
    }

    /// Combined genesis population of one shard.
    pub fn shard_population(&self, shard: ShardId) -> usize {
        let count = |lists: &BTreeMap<ShardId, Vec<Validator>>| {
            lists.get(&shard).map(Vec::len).unwrap_or_default()
        };
        count(&self.eligible) + count(&self.waiting)
    }
}

impl Default for GenesisSetup {
    fn default() -> Self {
        Self {
            chain_id: "kestrel".to_string(),
            start_time: 0,
            num_shards: 1,
            self_shard_id: 0,
            eligible: BTreeMap::new(),
            waiting: BTreeMap::new(),
        }
    }
}

//! Gossip topics and the request wire format.

use kn_types::{shard_label, Hash, ShardId};
use serde::{Deserialize, Serialize};

/// A gossip topic the engine publishes or subscribes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Block headers of one shard.
    ShardHeaders(ShardId),
    /// Metachain headers, including epoch-start metablocks.
    MetaHeaders,
    /// Mini-block bodies originating from one shard.
    MiniBlocks(ShardId),
    /// Trie nodes of one shard's account tries.
    TrieNodes(ShardId),
    /// Transactions destined for one shard.
    Transactions(ShardId),
    /// Consensus traffic of one shard; joined at the end of bootstrap.
    Consensus(ShardId),
}

impl Topic {
    /// Name of the data topic payloads arrive on.
    pub fn name(&self) -> String {
        match self {
            Self::ShardHeaders(shard) => format!("headers_{}", shard_label(*shard)),
            Self::MetaHeaders => "headers_meta".to_string(),
            Self::MiniBlocks(shard) => format!("mini_blocks_{}", shard_label(*shard)),
            Self::TrieNodes(shard) => format!("trie_nodes_{}", shard_label(*shard)),
            Self::Transactions(shard) => format!("transactions_{}", shard_label(*shard)),
            Self::Consensus(shard) => format!("consensus_{}", shard_label(*shard)),
        }
    }

    /// Name of the paired topic requests are broadcast on.
    pub fn request_name(&self) -> String {
        format!("{}_request", self.name())
    }
}

/// A batched pull request for content-addressed payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    /// The hashes the sender is missing.
    ///
    /// Empty on the epoch-start topic, where the request is "your current
    /// epoch-start metablock" rather than a set of known hashes.
    pub hashes: Vec<Hash>,
}

/// Topic the epoch-start metablock request is broadcast on.
pub const EPOCH_START_REQUEST_TOPIC: &str = "epoch_start_request";

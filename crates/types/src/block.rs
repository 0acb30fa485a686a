//! Block headers, the epoch-start metablock and mini-blocks.

use crate::{encode, Epoch, Hash, Nonce, Round, ShardId};
use serde::{Deserialize, Serialize};

/// Summary of a mini-block as carried inside a block header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBlockHeader {
    /// Content hash of the mini-block body.
    pub hash: Hash,
    /// Shard the transactions originate from.
    pub sender_shard: ShardId,
    /// Shard the transactions are destined for.
    pub receiver_shard: ShardId,
    /// Number of transaction hashes in the body.
    pub tx_count: u32,
}

/// A batch of transaction hashes moving between a shard pair.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBlock {
    /// Shard the transactions originate from.
    pub sender_shard: ShardId,
    /// Shard the transactions are destined for.
    pub receiver_shard: ShardId,
    /// Hashes of the batched transactions.
    pub tx_hashes: Vec<Hash>,
}

impl MiniBlock {
    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::compute(&encode(self))
    }
}

/// A block header produced by one shard chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    /// The shard this header belongs to.
    pub shard_id: ShardId,
    /// Epoch the header was produced in.
    pub epoch: Epoch,
    /// Consensus round of the header.
    pub round: Round,
    /// Sequence number within the shard chain.
    pub nonce: Nonce,
    /// Hash of the previous header in the chain.
    pub prev_hash: Hash,
    /// Root of the shard's user-accounts trie at this header.
    pub root_hash: Hash,
    /// Mini-blocks included in this header.
    pub mini_block_headers: Vec<MiniBlockHeader>,
}

impl ShardHeader {
    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::compute(&encode(self))
    }
}

/// Per-shard finality data carried by an epoch-start metablock.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStartShardData {
    /// The shard this entry finalises.
    pub shard_id: ShardId,
    /// Hash of the shard's last finalized header.
    pub header_hash: Hash,
    /// Root of the shard's user-accounts trie at that header.
    pub root_hash: Hash,
    /// First metablock with cross-shard work still pending for this shard.
    pub first_pending_meta_block: Hash,
    /// Last metablock fully processed by this shard.
    pub last_finished_meta_block: Hash,
    /// Cross-shard mini-blocks not yet executed by this shard.
    pub pending_mini_block_headers: Vec<MiniBlockHeader>,
}

/// The first metablock of an epoch; the bootstrap checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStartMetaBlock {
    /// Chain identifier, checked during header integrity verification.
    pub chain_id: String,
    /// The epoch this metablock starts.
    pub epoch: Epoch,
    /// Consensus round of the metablock.
    pub round: Round,
    /// Sequence number within the metachain.
    pub nonce: Nonce,
    /// Root of the metachain user-accounts trie.
    pub root_hash: Hash,
    /// Root of the peer-accounts (validator statistics) trie.
    pub validator_stats_root_hash: Hash,
    /// Hash of the previous epoch-start metablock.
    pub prev_epoch_start_hash: Hash,
    /// One entry per shard, in shard order.
    pub last_finalized_headers: Vec<EpochStartShardData>,
}

impl EpochStartMetaBlock {
    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::compute(&encode(self))
    }

    /// Number of shards finalised by this metablock.
    pub fn num_shards(&self) -> u32 {
        self.last_finalized_headers.len() as u32
    }

    /// The finality entry for one shard, if present.
    pub fn shard_data(&self, shard_id: ShardId) -> Option<&EpochStartShardData> {
        self.last_finalized_headers.iter().find(|data| data.shard_id == shard_id)
    }
}

/// Any header the bootstrap header pool can hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockHeader {
    /// A header from one of the account shards.
    Shard(ShardHeader),
    /// A metachain header.
    Meta(EpochStartMetaBlock),
}

impl BlockHeader {
    /// Content hash of the wrapped header.
    ///
    /// The wrapper is not part of the content address: a shard header and a
    /// metablock hash the same whether or not they travelled inside
    /// [BlockHeader].
    pub fn hash(&self) -> Hash {
        match self {
            Self::Shard(header) => header.hash(),
            Self::Meta(meta) => meta.hash(),
        }
    }

    /// The shard the header belongs to.
    pub fn shard_id(&self) -> ShardId {
        match self {
            Self::Shard(header) => header.shard_id,
            Self::Meta(_) => crate::METACHAIN_SHARD_ID,
        }
    }

    /// Epoch the header was produced in.
    pub fn epoch(&self) -> Epoch {
        match self {
            Self::Shard(header) => header.epoch,
            Self::Meta(meta) => meta.epoch,
        }
    }

    /// The wrapped shard header, if this is one.
    pub fn as_shard(&self) -> Option<&ShardHeader> {
        match self {
            Self::Shard(header) => Some(header),
            Self::Meta(_) => None,
        }
    }

    /// The wrapped metablock, if this is one.
    pub fn as_meta(&self) -> Option<&EpochStartMetaBlock> {
        match self {
            Self::Shard(_) => None,
            Self::Meta(meta) => Some(meta),
        }
    }
}

/// A signed transaction as it travels the gossip fabric.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Sender account nonce.
    pub nonce: u64,
    /// Serialized sender address.
    pub sender: Vec<u8>,
    /// Serialized receiver address.
    pub receiver: Vec<u8>,
    /// Transferred value.
    pub value: u128,
    /// Opaque call data.
    pub data: Vec<u8>,
    /// Signature over the unsigned encoding (or its hash, scheme-dependent).
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Content hash of the canonical encoding.
    pub fn hash(&self) -> Hash {
        Hash::compute(&encode(self))
    }

    /// The bytes covered by the signature under the legacy scheme.
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let unsigned = Self { signature: Vec::new(), ..self.clone() };
        encode(&unsigned)
    }
}

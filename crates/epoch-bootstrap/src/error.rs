//! Error taxonomy of the bootstrap engine.

use kn_types::{Hash, ShardId};
use thiserror::Error;

/// Convenience alias used across the engine.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Everything that can go wrong while bootstrapping.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A deadline expired while peers still owed us payloads.
    #[error("timed out waiting for {} payloads", missing.len())]
    Timeout {
        /// The hashes that never arrived.
        missing: Vec<Hash>,
    },

    /// No epoch-start metablock was confirmed by enough peers.
    #[error("no epoch start metablock reached a quorum of {quorum} peers")]
    PeerQuorumFailed {
        /// The quorum that was required.
        quorum: usize,
    },

    /// A hash or signature check failed on a payload we cannot do without.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// The trie re-request budget was exhausted with nodes still missing.
    #[error("trie sync stalled: re-request budget of {budget} exhausted")]
    TrieSyncStalled {
        /// The configured budget.
        budget: usize,
    },

    /// A payload decoded, but not into the shape this phase expected.
    #[error("unexpected payload shape: expected {0}")]
    WrongTypeAssertion(&'static str),

    /// The storage collaborator failed.
    #[error("storage failure: {0}")]
    Storage(#[from] eyre::Report),

    /// The driver was cancelled; nothing was persisted.
    #[error("bootstrap cancelled")]
    Cancelled,

    /// A collaborator or option was missing or inconsistent at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The epoch-start metablock has no entry for our shard.
    #[error("no epoch start data for shard {0}")]
    EpochStartDataNotFound(ShardId),

    /// A request was issued for a topic the messenger does not know.
    #[error("unknown topic {0}")]
    UnknownTopic(String),
}

//! Contracts of the collaborators the engine consumes.

use crate::BootstrapResult;
use kn_types::BlockHeader;
use std::sync::Arc;

/// Handles raw gossip messages on one topic.
///
/// Processors run on the transport's dispatch threads and must be reentrant;
/// anything they reject is dropped without a reply.
pub trait MessageProcessor: Send + Sync {
    /// Handle `data` received from `peer`.
    fn process(&self, peer: &str, data: &[u8]);
}

/// The transport the engine talks to the network through.
pub trait Messenger: Send + Sync {
    /// Join a gossip topic, creating it if needed.
    fn create_topic(&self, topic: &str) -> BootstrapResult<()>;
    /// Attach a processor to a joined topic.
    fn register_processor(
        &self,
        topic: &str,
        processor: Arc<dyn MessageProcessor>,
    ) -> BootstrapResult<()>;
    /// Publish bytes on a joined topic.
    fn broadcast(&self, topic: &str, data: &[u8]) -> BootstrapResult<()>;
    /// Detach every registered processor.
    fn unregister_all(&self) -> BootstrapResult<()>;
    /// Leave every joined topic.
    fn unjoin_all(&self) -> BootstrapResult<()>;
}

/// Schema-level header authentication (chain id, reserved fields, signature
/// proof-of-work). The engine treats the how as opaque.
pub trait HeaderIntegrityVerifier: Send + Sync {
    /// Fails when the header cannot be trusted.
    fn verify(&self, header: &BlockHeader) -> BootstrapResult<()>;
}

/// Verifies a single signature over a message.
pub trait SingleSigner: Send + Sync {
    /// True when `signature` is valid for `message` under `pub_key`.
    fn verify(&self, pub_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Monotonic round counter.
pub trait Rounder: Send + Sync {
    /// The current round index; negative before genesis.
    fn index(&self) -> i64;
}

/// Sink for the engine's status metrics.
pub trait StatusHandler: Send + Sync {
    /// Record an unsigned metric value.
    fn set_u64(&self, key: &'static str, value: u64);
}

/// Metric key for the nonce of the accepted epoch-start metablock.
pub const METRIC_NONCE_AT_EPOCH_START: &str = "nonce_at_epoch_start";
/// Metric key for the round of the accepted epoch-start metablock.
pub const METRIC_ROUND_AT_EPOCH_START: &str = "round_at_epoch_start";

/// Status handler that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusHandler;

impl StatusHandler for NoopStatusHandler {
    fn set_u64(&self, _key: &'static str, _value: u64) {}
}

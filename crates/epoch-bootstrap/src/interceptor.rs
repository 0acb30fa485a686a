//! Gossip interceptors feeding the typed pools.
//!
//! One pipeline per topic: decode, structural validation, integrity or
//! signature verification, whitelist check, pool deposit. Anything failing a
//! stage is dropped silently; drops are counted but never reported upward.

use crate::{
    BootstrapResult, CandidateTallies, HeaderIntegrityVerifier, MessageProcessor, Messenger,
    PoolsHolder, SingleSigner, Topic, WhitelistHandler,
};
use kn_types::{
    decode, BlockHeader, Epoch, Hash, MiniBlock, ShardId, SignedTransaction, TrieNode,
    METACHAIN_SHARD_ID,
};
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use tracing::trace;

/// Message counters kept by every interceptor.
#[derive(Debug, Default)]
pub struct InterceptorStats {
    received: AtomicU64,
    dropped: AtomicU64,
}

impl InterceptorStats {
    fn saw(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn drop_one(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages seen on the topic.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages rejected by some pipeline stage.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Shared pieces every interceptor pipeline needs.
struct InterceptorBase {
    pools: Arc<PoolsHolder>,
    whitelist: Arc<WhitelistHandler>,
    stats: Arc<InterceptorStats>,
}

/// Admits metachain headers: requested ones by whitelist, epoch-start
/// candidates while the locator is tallying.
struct MetaHeaderInterceptor {
    base: InterceptorBase,
    integrity: Arc<dyn HeaderIntegrityVerifier>,
    tallies: Arc<CandidateTallies>,
    chain_id: String,
}

impl MessageProcessor for MetaHeaderInterceptor {
    fn process(&self, peer: &str, data: &[u8]) {
        self.base.stats.saw();
        let Ok(meta) = decode::<kn_types::EpochStartMetaBlock>(data) else {
            self.base.stats.drop_one();
            return;
        };
        if meta.chain_id != self.chain_id || meta.last_finalized_headers.is_empty() {
            self.base.stats.drop_one();
            return;
        }
        let header = BlockHeader::Meta(meta);
        if self.integrity.verify(&header).is_err() {
            self.base.stats.drop_one();
            return;
        }
        let hash = header.hash();
        let solicited = self.base.whitelist.admit(&hash);
        let tallying = self.tallies.is_active();
        if !solicited && !tallying {
            self.base.stats.drop_one();
            return;
        }
        trace!(target: "bootstrap::interceptor", %peer, ?hash, "metachain header accepted");
        self.base.pools.headers.insert(hash, header);
        if tallying {
            self.tallies.record(hash, peer);
        }
    }
}

/// Admits whitelisted shard headers.
struct ShardHeaderInterceptor {
    base: InterceptorBase,
    integrity: Arc<dyn HeaderIntegrityVerifier>,
    num_shards: u32,
}

impl MessageProcessor for ShardHeaderInterceptor {
    fn process(&self, peer: &str, data: &[u8]) {
        self.base.stats.saw();
        let Ok(header) = decode::<kn_types::ShardHeader>(data) else {
            self.base.stats.drop_one();
            return;
        };
        if header.shard_id >= self.num_shards {
            self.base.stats.drop_one();
            return;
        }
        let header = BlockHeader::Shard(header);
        if self.integrity.verify(&header).is_err() {
            self.base.stats.drop_one();
            return;
        }
        let hash = header.hash();
        if !self.base.whitelist.admit(&hash) {
            self.base.stats.drop_one();
            return;
        }
        trace!(target: "bootstrap::interceptor", %peer, ?hash, "shard header accepted");
        self.base.pools.headers.insert(hash, header);
    }
}

/// Admits whitelisted mini-block bodies.
struct MiniBlockInterceptor {
    base: InterceptorBase,
}

impl MessageProcessor for MiniBlockInterceptor {
    fn process(&self, peer: &str, data: &[u8]) {
        self.base.stats.saw();
        let Ok(mini_block) = decode::<MiniBlock>(data) else {
            self.base.stats.drop_one();
            return;
        };
        if mini_block.tx_hashes.is_empty() {
            self.base.stats.drop_one();
            return;
        }
        let hash = mini_block.hash();
        if !self.base.whitelist.admit(&hash) {
            self.base.stats.drop_one();
            return;
        }
        trace!(target: "bootstrap::interceptor", %peer, ?hash, "mini block accepted");
        self.base.pools.mini_blocks.insert(hash, mini_block);
    }
}

/// Admits whitelisted trie nodes, stored as raw bytes under their content
/// hash; the trie-sync workers re-verify before writing to storage.
struct TrieNodeInterceptor {
    base: InterceptorBase,
}

impl MessageProcessor for TrieNodeInterceptor {
    fn process(&self, peer: &str, data: &[u8]) {
        self.base.stats.saw();
        if TrieNode::from_bytes(data).is_err() {
            self.base.stats.drop_one();
            return;
        }
        let hash = Hash::compute(data);
        if !self.base.whitelist.admit(&hash) {
            self.base.stats.drop_one();
            return;
        }
        trace!(target: "bootstrap::interceptor", %peer, ?hash, "trie node accepted");
        self.base.pools.trie_nodes.insert(hash, data.to_vec());
    }
}

/// Admits transactions with a valid signature.
///
/// From `scheme_switch_epoch` on, signatures cover the hash of the unsigned
/// encoding instead of the encoding itself.
struct TransactionInterceptor {
    base: InterceptorBase,
    signer: Arc<dyn SingleSigner>,
    scheme_switch_epoch: Epoch,
    current_epoch: Arc<AtomicU32>,
}

impl MessageProcessor for TransactionInterceptor {
    fn process(&self, peer: &str, data: &[u8]) {
        self.base.stats.saw();
        let Ok(tx) = decode::<SignedTransaction>(data) else {
            self.base.stats.drop_one();
            return;
        };
        if tx.signature.is_empty() || tx.sender.is_empty() {
            self.base.stats.drop_one();
            return;
        }
        let unsigned = tx.unsigned_bytes();
        let message = if self.current_epoch.load(Ordering::Relaxed) >= self.scheme_switch_epoch {
            Hash::compute(&unsigned).to_vec()
        } else {
            unsigned
        };
        if !self.signer.verify(&tx.sender, &message, &tx.signature) {
            self.base.stats.drop_one();
            return;
        }
        let hash = tx.hash();
        trace!(target: "bootstrap::interceptor", %peer, ?hash, "transaction accepted");
        self.base.pools.transactions.insert(hash, tx);
    }
}

/// Arguments for building the interceptor container.
pub struct InterceptorContainerArgs {
    /// Transport to register processors on.
    pub messenger: Arc<dyn Messenger>,
    /// Pools the interceptors deposit into.
    pub pools: Arc<PoolsHolder>,
    /// Whitelist gating admission of requested payloads.
    pub whitelist: Arc<WhitelistHandler>,
    /// Header authentication collaborator.
    pub integrity: Arc<dyn HeaderIntegrityVerifier>,
    /// Transaction signature verifier.
    pub signer: Arc<dyn SingleSigner>,
    /// Tally sink for epoch-start candidates.
    pub tallies: Arc<CandidateTallies>,
    /// Chain id every header must carry.
    pub chain_id: String,
    /// Number of account shards to join topics for.
    pub num_shards: u32,
    /// Epoch from which transaction signatures cover the tx hash.
    pub tx_signed_with_hash_enable_epoch: Epoch,
}

/// Owns the per-topic interceptor pipelines for one bootstrap run.
pub struct EpochStartInterceptorContainer {
    messenger: Arc<dyn Messenger>,
    stats: Vec<(String, Arc<InterceptorStats>)>,
    current_epoch: Arc<AtomicU32>,
}

impl EpochStartInterceptorContainer {
    /// Join all bootstrap topics and attach a pipeline to each.
    pub fn new(args: InterceptorContainerArgs) -> BootstrapResult<Self> {
        let InterceptorContainerArgs {
            messenger,
            pools,
            whitelist,
            integrity,
            signer,
            tallies,
            chain_id,
            num_shards,
            tx_signed_with_hash_enable_epoch,
        } = args;
        let current_epoch = Arc::new(AtomicU32::new(0));
        let mut container = Self { messenger, stats: Vec::new(), current_epoch };

        let base = |stats: &Arc<InterceptorStats>| InterceptorBase {
            pools: Arc::clone(&pools),
            whitelist: Arc::clone(&whitelist),
            stats: Arc::clone(stats),
        };

        let meta_stats = Arc::new(InterceptorStats::default());
        container.attach(
            Topic::MetaHeaders,
            Arc::new(MetaHeaderInterceptor {
                base: base(&meta_stats),
                integrity: Arc::clone(&integrity),
                tallies,
                chain_id,
            }),
            meta_stats,
        )?;

        let mut shards: Vec<ShardId> = (0..num_shards).collect();
        shards.push(METACHAIN_SHARD_ID);

        for shard in 0..num_shards {
            let stats = Arc::new(InterceptorStats::default());
            container.attach(
                Topic::ShardHeaders(shard),
                Arc::new(ShardHeaderInterceptor {
                    base: base(&stats),
                    integrity: Arc::clone(&integrity),
                    num_shards,
                }),
                stats,
            )?;
        }

        for &shard in &shards {
            let stats = Arc::new(InterceptorStats::default());
            container.attach(
                Topic::MiniBlocks(shard),
                Arc::new(MiniBlockInterceptor { base: base(&stats) }),
                stats,
            )?;

            let stats = Arc::new(InterceptorStats::default());
            container.attach(
                Topic::TrieNodes(shard),
                Arc::new(TrieNodeInterceptor { base: base(&stats) }),
                stats,
            )?;

            let stats = Arc::new(InterceptorStats::default());
            container.attach(
                Topic::Transactions(shard),
                Arc::new(TransactionInterceptor {
                    base: base(&stats),
                    signer: Arc::clone(&signer),
                    scheme_switch_epoch: tx_signed_with_hash_enable_epoch,
                    current_epoch: Arc::clone(&container.current_epoch),
                }),
                stats,
            )?;
        }

        Ok(container)
    }

    fn attach(
        &mut self,
        topic: Topic,
        processor: Arc<dyn MessageProcessor>,
        stats: Arc<InterceptorStats>,
    ) -> BootstrapResult<()> {
        let name = topic.name();
        self.messenger.create_topic(&name)?;
        self.messenger.register_processor(&name, processor)?;
        self.stats.push((name, stats));
        Ok(())
    }

    /// Tell epoch-sensitive pipelines which epoch is current.
    pub fn set_current_epoch(&self, epoch: Epoch) {
        self.current_epoch.store(epoch, Ordering::Relaxed);
    }

    /// Counters for one topic, if an interceptor is attached to it.
    pub fn stats(&self, topic: &Topic) -> Option<&InterceptorStats> {
        let name = topic.name();
        self.stats.iter().find(|(topic, _)| topic == &name).map(|(_, stats)| stats.as_ref())
    }

    /// Detach every processor from the transport.
    pub fn unregister_all(&self) -> BootstrapResult<()> {
        self.messenger.unregister_all()
    }
}

#[cfg(test)]
#[path = "tests/interceptor_tests.rs"]
mod interceptor_tests;

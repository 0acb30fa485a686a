//! Explicit fakes and fixtures for engine tests.

use crate::{
    BootstrapError, BootstrapResult, HeaderIntegrityVerifier, MessageProcessor, Messenger,
    RequestMessage, Rounder, SingleSigner, EPOCH_START_REQUEST_TOPIC,
};
use kn_config::GenesisSetup;
use kn_storage::{LatestStorageData, LatestStorageDataProvider, StoreResult};
use kn_types::{
    decode, encode, BlockHeader, EpochStartMetaBlock, EpochStartShardData, Hash, MiniBlock,
    ShardHeader, TrieNode, Validator, ValidatorPubKey,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
};

/// Install a test tracing subscriber; repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A payload a scripted peer will serve for one requested hash.
#[derive(Clone)]
pub struct ScriptedResponse {
    /// The data topic the payload arrives on.
    pub topic: String,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
    /// The peer serving it.
    pub peer: String,
}

/// In-process messenger that answers requests from a scripted peer map.
///
/// Requests broadcast on a `*_request` topic are answered synchronously by
/// invoking the processor registered on the paired data topic, which is how
/// the pools get fed without a network.
#[derive(Default)]
pub struct FakeMessenger {
    topics: Mutex<HashSet<String>>,
    processors: Mutex<HashMap<String, Arc<dyn MessageProcessor>>>,
    responses: Mutex<HashMap<Hash, (ScriptedResponse, u32)>>,
    epoch_start_answers: Mutex<Vec<(EpochStartMetaBlock, Vec<String>)>>,
    broadcasts: Mutex<Vec<(String, Vec<u8>)>>,
    unregistered: AtomicBool,
    unjoined: AtomicBool,
}

impl FakeMessenger {
    /// A messenger with nothing scripted.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a payload for one hash.
    pub fn script_response(&self, hash: Hash, response: ScriptedResponse) {
        self.responses.lock().insert(hash, (response, 0));
    }

    /// Script a payload served only after the first `drops` requests for it
    /// went unanswered.
    pub fn script_response_after(&self, hash: Hash, response: ScriptedResponse, drops: u32) {
        self.responses.lock().insert(hash, (response, drops));
    }

    /// Script an answer to the epoch-start request, served by `peers`.
    ///
    /// May be called more than once to script competing candidates.
    pub fn script_epoch_start(&self, meta: EpochStartMetaBlock, peers: &[&str]) {
        self.epoch_start_answers
            .lock()
            .push((meta, peers.iter().map(|peer| peer.to_string()).collect()));
    }

    /// Push an unsolicited message straight into a topic's processor.
    pub fn deliver(&self, topic: &str, peer: &str, data: &[u8]) {
        let processor = self.processors.lock().get(topic).cloned();
        if let Some(processor) = processor {
            processor.process(peer, data);
        }
    }

    /// Every broadcast so far, in order.
    pub fn broadcasts(&self) -> Vec<(String, Vec<u8>)> {
        self.broadcasts.lock().clone()
    }

    /// Number of broadcasts on one topic.
    pub fn broadcast_count(&self, topic: &str) -> usize {
        self.broadcasts.lock().iter().filter(|(name, _)| name == topic).count()
    }

    /// True once `unregister_all` was called.
    pub fn unregistered(&self) -> bool {
        self.unregistered.load(Ordering::Acquire)
    }

    /// True once `unjoin_all` was called.
    pub fn unjoined(&self) -> bool {
        self.unjoined.load(Ordering::Acquire)
    }

    fn answer_request(&self, topic: &str, data: &[u8]) {
        if topic == EPOCH_START_REQUEST_TOPIC {
            let answers = self.epoch_start_answers.lock().clone();
            for (meta, peers) in answers {
                let bytes = encode(&meta);
                for peer in peers {
                    self.deliver("headers_meta", &peer, &bytes);
                }
            }
            return;
        }

        let Ok(request) = decode::<RequestMessage>(data) else { return };
        for hash in request.hashes {
            let response = {
                let mut responses = self.responses.lock();
                match responses.get_mut(&hash) {
                    Some((_, drops)) if *drops > 0 => {
                        *drops -= 1;
                        None
                    }
                    Some((response, _)) => Some(response.clone()),
                    None => None,
                }
            };
            if let Some(response) = response {
                self.deliver(&response.topic, &response.peer, &response.payload);
            }
        }
    }
}

impl Messenger for FakeMessenger {
    fn create_topic(&self, topic: &str) -> BootstrapResult<()> {
        self.topics.lock().insert(topic.to_string());
        Ok(())
    }

    fn register_processor(
        &self,
        topic: &str,
        processor: Arc<dyn MessageProcessor>,
    ) -> BootstrapResult<()> {
        if !self.topics.lock().contains(topic) {
            return Err(BootstrapError::UnknownTopic(topic.to_string()));
        }
        self.processors.lock().insert(topic.to_string(), processor);
        Ok(())
    }

    fn broadcast(&self, topic: &str, data: &[u8]) -> BootstrapResult<()> {
        if !self.topics.lock().contains(topic) {
            return Err(BootstrapError::UnknownTopic(topic.to_string()));
        }
        self.broadcasts.lock().push((topic.to_string(), data.to_vec()));
        if topic.ends_with("_request") || topic == EPOCH_START_REQUEST_TOPIC {
            self.answer_request(topic, data);
        }
        Ok(())
    }

    fn unregister_all(&self) -> BootstrapResult<()> {
        self.processors.lock().clear();
        self.unregistered.store(true, Ordering::Release);
        Ok(())
    }

    fn unjoin_all(&self) -> BootstrapResult<()> {
        self.topics.lock().clear();
        self.unjoined.store(true, Ordering::Release);
        Ok(())
    }
}

/// Integrity verifier that can be flipped into rejecting everything.
#[derive(Default)]
pub struct FakeIntegrityVerifier {
    reject: AtomicBool,
}

impl FakeIntegrityVerifier {
    /// A verifier accepting everything.
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject all headers from now on.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::Release);
    }
}

impl HeaderIntegrityVerifier for FakeIntegrityVerifier {
    fn verify(&self, _header: &BlockHeader) -> BootstrapResult<()> {
        if self.reject.load(Ordering::Acquire) {
            return Err(BootstrapError::IntegrityViolation("rejected by test verifier".into()));
        }
        Ok(())
    }
}

/// Signer accepting or rejecting everything.
pub struct FakeSigner {
    accept: bool,
}

impl FakeSigner {
    /// A signer validating every signature.
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self { accept: true })
    }

    /// A signer rejecting every signature.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self { accept: false })
    }
}

impl SingleSigner for FakeSigner {
    fn verify(&self, _pub_key: &[u8], _message: &[u8], _signature: &[u8]) -> bool {
        self.accept
    }
}

/// Rounder pinned to a settable index.
pub struct FixedRounder {
    index: AtomicI64,
}

impl FixedRounder {
    /// A rounder reporting `index`.
    pub fn at(index: i64) -> Arc<Self> {
        Arc::new(Self { index: AtomicI64::new(index) })
    }
}

impl Rounder for FixedRounder {
    fn index(&self) -> i64 {
        self.index.load(Ordering::Relaxed)
    }
}

/// Checkpoint provider returning a fixed record.
pub struct FixedLatestData(pub LatestStorageData);

impl LatestStorageDataProvider for FixedLatestData {
    fn probe(&self) -> StoreResult<LatestStorageData> {
        Ok(self.0.clone())
    }
}

/// A genesis setup with `per_shard` validators in every shard's eligible
/// list, keyed by predictable fill bytes.
pub fn genesis_with_shards(num_shards: u32, per_shard: usize) -> GenesisSetup {
    let mut eligible = BTreeMap::new();
    let mut fill = 1u8;
    for shard in 0..num_shards {
        let mut validators = Vec::new();
        for _ in 0..per_shard {
            validators.push(Validator::new(ValidatorPubKey::filled(fill)));
            fill += 1;
        }
        eligible.insert(shard, validators);
    }
    GenesisSetup {
        chain_id: "kestrel-test".to_string(),
        start_time: 0,
        num_shards,
        self_shard_id: 0,
        eligible,
        waiting: BTreeMap::new(),
    }
}

/// A three-level trie fixture: root branch, one extension, two leaves.
///
/// Returns the root hash and every node's `(hash, bytes)` pair.
pub fn small_trie() -> (Hash, Vec<(Hash, Vec<u8>)>) {
    let leaf_a = TrieNode::leaf(&[1, 2], b"account-a");
    let leaf_b = TrieNode::leaf(&[3, 4], b"account-b");
    let extension = TrieNode::Extension { path: vec![7], child: leaf_b.hash() };
    let root = TrieNode::branch(&[(0, leaf_a.hash()), (5, extension.hash())]);

    let nodes = vec![
        (root.hash(), encode(&root)),
        (extension.hash(), encode(&extension)),
        (leaf_a.hash(), encode(&leaf_a)),
        (leaf_b.hash(), encode(&leaf_b)),
    ];
    (root.hash(), nodes)
}

/// Fixture bundling an epoch-start metablock with the headers it finalises.
pub struct EpochFixture {
    /// The epoch-start metablock.
    pub meta: EpochStartMetaBlock,
    /// The previous epoch's start metablock.
    pub prev_meta: EpochStartMetaBlock,
    /// One finalized header per shard, in shard order.
    pub shard_headers: Vec<ShardHeader>,
    /// Metablocks referenced by the per-shard finality data.
    pub referenced_metas: Vec<EpochStartMetaBlock>,
}

/// Build a consistent epoch fixture at `epoch` with `num_shards` shards.
///
/// Each shard header carries `root_hash` as its user-accounts root so trie
/// fixtures can be shared.
pub fn epoch_fixture(epoch: u32, num_shards: u32, root_hash: Hash) -> EpochFixture {
    let prev_meta = EpochStartMetaBlock {
        chain_id: "kestrel-test".to_string(),
        epoch: epoch - 1,
        round: (epoch as u64 - 1) * 1_000,
        nonce: (epoch as u64 - 1) * 990,
        last_finalized_headers: vec![EpochStartShardData::default()],
        ..Default::default()
    };

    let last_finished = EpochStartMetaBlock {
        chain_id: "kestrel-test".to_string(),
        epoch: epoch - 1,
        round: epoch as u64 * 1_000 - 20,
        nonce: epoch as u64 * 990 - 20,
        last_finalized_headers: vec![EpochStartShardData::default()],
        ..Default::default()
    };
    let first_pending = EpochStartMetaBlock {
        chain_id: "kestrel-test".to_string(),
        epoch: epoch - 1,
        round: epoch as u64 * 1_000 - 10,
        nonce: epoch as u64 * 990 - 10,
        last_finalized_headers: vec![EpochStartShardData::default()],
        ..Default::default()
    };

    let mut shard_headers = Vec::new();
    let mut last_finalized_headers = Vec::new();
    for shard in 0..num_shards {
        let header = ShardHeader {
            shard_id: shard,
            epoch,
            round: epoch as u64 * 1_000,
            nonce: epoch as u64 * 950 + shard as u64,
            root_hash,
            ..Default::default()
        };
        last_finalized_headers.push(EpochStartShardData {
            shard_id: shard,
            header_hash: header.hash(),
            root_hash,
            first_pending_meta_block: first_pending.hash(),
            last_finished_meta_block: last_finished.hash(),
            pending_mini_block_headers: Vec::new(),
        });
        shard_headers.push(header);
    }

    let meta = EpochStartMetaBlock {
        chain_id: "kestrel-test".to_string(),
        epoch,
        round: epoch as u64 * 1_000,
        nonce: epoch as u64 * 990,
        root_hash,
        validator_stats_root_hash: root_hash,
        prev_epoch_start_hash: prev_meta.hash(),
        last_finalized_headers,
    };

    EpochFixture { meta, prev_meta, shard_headers, referenced_metas: vec![last_finished, first_pending] }
}

/// Script every payload of `fixture` plus the trie `nodes` on `messenger`.
pub fn script_epoch_fixture(
    messenger: &FakeMessenger,
    fixture: &EpochFixture,
    nodes: &[(Hash, Vec<u8>)],
    peer: &str,
) {
    messenger.script_epoch_start(fixture.meta.clone(), &[peer, "second-peer"]);

    messenger.script_response(
        fixture.prev_meta.hash(),
        ScriptedResponse {
            topic: "headers_meta".to_string(),
            payload: encode(&fixture.prev_meta),
            peer: peer.to_string(),
        },
    );
    for referenced in &fixture.referenced_metas {
        messenger.script_response(
            referenced.hash(),
            ScriptedResponse {
                topic: "headers_meta".to_string(),
                payload: encode(referenced),
                peer: peer.to_string(),
            },
        );
    }
    for header in &fixture.shard_headers {
        messenger.script_response(
            header.hash(),
            ScriptedResponse {
                topic: format!("headers_{}", header.shard_id),
                payload: encode(header),
                peer: peer.to_string(),
            },
        );
    }
    for (hash, bytes) in nodes {
        messenger.script_response(
            *hash,
            ScriptedResponse {
                topic: "trie_nodes_meta".to_string(),
                payload: bytes.clone(),
                peer: peer.to_string(),
            },
        );
    }
}

/// Script a mini-block body served by `peer`.
pub fn script_mini_block(messenger: &FakeMessenger, mini_block: &MiniBlock, peer: &str) {
    messenger.script_response(
        mini_block.hash(),
        ScriptedResponse {
            topic: format!("mini_blocks_{}", mini_block.sender_shard),
            payload: encode(mini_block),
            peer: peer.to_string(),
        },
    );
}

/// Script trie nodes on one shard's trie-node topic.
pub fn script_trie_nodes(
    messenger: &FakeMessenger,
    nodes: &[(Hash, Vec<u8>)],
    shard_label: &str,
    peer: &str,
) {
    for (hash, bytes) in nodes {
        messenger.script_response(
            *hash,
            ScriptedResponse {
                topic: format!("trie_nodes_{shard_label}"),
                payload: bytes.clone(),
                peer: peer.to_string(),
            },
        );
    }
}

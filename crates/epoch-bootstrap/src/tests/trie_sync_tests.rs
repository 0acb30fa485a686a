//! Trie synchroniser tests.

use crate::{
    test_utils::{
        small_trie, FakeIntegrityVerifier, FakeMessenger, FakeSigner, ScriptedResponse,
    },
    BootstrapError, CandidateTallies, EpochStartInterceptorContainer, InterceptorContainerArgs,
    Messenger as _, PoolsHolder, RequestCoordinator, Topic, TrieSyncer, TrieSyncerArgs,
    WhitelistHandler,
};
use assert_matches::assert_matches;
use kn_config::{RequestConfig, TrieSyncConfig, TrieSyncerVersion, WhitelistConfig};
use kn_storage::{MemTrieStorage, TrieStorageManager};
use kn_types::{encode, Hash, Notifier, TrieNode};
use std::{sync::Arc, time::Duration};

struct Setup {
    messenger: Arc<FakeMessenger>,
    pools: Arc<PoolsHolder>,
    coordinator: Arc<RequestCoordinator>,
    storage: Arc<MemTrieStorage>,
    _container: EpochStartInterceptorContainer,
    shutdown: Notifier,
}

fn setup() -> Setup {
    let messenger = FakeMessenger::new();
    messenger.create_topic(&Topic::TrieNodes(0).request_name()).unwrap();
    let pools = PoolsHolder::new();
    let whitelist = Arc::new(WhitelistHandler::new(&WhitelistConfig::default()));
    let container = EpochStartInterceptorContainer::new(InterceptorContainerArgs {
        messenger: Arc::clone(&messenger) as Arc<dyn crate::Messenger>,
        pools: Arc::clone(&pools),
        whitelist: Arc::clone(&whitelist),
        integrity: FakeIntegrityVerifier::accepting(),
        signer: FakeSigner::accepting(),
        tallies: CandidateTallies::new(),
        chain_id: "kestrel-test".to_string(),
        num_shards: 1,
        tx_signed_with_hash_enable_epoch: u32::MAX,
    })
    .unwrap();
    let coordinator = Arc::new(RequestCoordinator::new(
        Arc::clone(&messenger) as Arc<dyn crate::Messenger>,
        whitelist,
        RequestConfig::default(),
    ));
    Setup {
        messenger,
        pools,
        coordinator,
        storage: Arc::new(MemTrieStorage::new()),
        _container: container,
        shutdown: Notifier::new(),
    }
}

fn config() -> TrieSyncConfig {
    TrieSyncConfig {
        num_concurrent_trie_syncers: 4,
        max_hard_cap_for_missing_nodes: 100,
        trie_syncer_version: TrieSyncerVersion::V1,
        max_state_trie_level_in_memory: 5,
        max_peer_trie_level_in_memory: 5,
        timeout_getting_trie_node: Duration::from_secs(60),
    }
}

fn syncer_with(setup: &Setup, config: TrieSyncConfig, max_level: u8) -> TrieSyncer {
    TrieSyncer::new(TrieSyncerArgs {
        storage: Arc::clone(&setup.storage) as Arc<dyn TrieStorageManager>,
        pools: Arc::clone(&setup.pools),
        coordinator: Arc::clone(&setup.coordinator),
        shard_id: 0,
        config,
        max_level_in_memory: max_level,
        request_cadence: Duration::from_millis(100),
        shutdown: setup.shutdown.subscribe(),
    })
    .unwrap()
}

fn script_nodes(setup: &Setup, nodes: &[(Hash, Vec<u8>)]) {
    for (hash, bytes) in nodes {
        setup.messenger.script_response(
            *hash,
            ScriptedResponse {
                topic: "trie_nodes_0".to_string(),
                payload: bytes.clone(),
                peer: "alice".to_string(),
            },
        );
    }
}

#[tokio::test(start_paused = true)]
async fn full_trie_lands_in_storage() {
    let setup = setup();
    let (root, nodes) = small_trie();
    script_nodes(&setup, &nodes);

    syncer_with(&setup, config(), 5).sync_trie(root).await.unwrap();

    for (hash, bytes) in &nodes {
        assert!(setup.storage.contains(hash).unwrap());
        assert_eq!(setup.storage.get(hash).unwrap().as_deref(), Some(bytes.as_slice()));
        // resident node invariant: stored bytes hash to the key
        assert_eq!(Hash::compute(bytes), *hash);
    }
    assert_eq!(setup.storage.snapshots(), vec![root]);
}

#[tokio::test(start_paused = true)]
async fn empty_root_is_a_no_op() {
    let setup = setup();
    syncer_with(&setup, config(), 5).sync_trie(Hash::default()).await.unwrap();
    assert!(setup.storage.is_empty());
    assert!(setup.messenger.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resident_root_skips_the_network(){
    let setup = setup();
    let (root, nodes) = small_trie();
    for (hash, bytes) in &nodes {
        setup.storage.put(hash, bytes).unwrap();
    }

    syncer_with(&setup, config(), 5).sync_trie(root).await.unwrap();
    assert!(setup.messenger.broadcasts().is_empty());
    assert_eq!(setup.storage.snapshots(), vec![root]);
}

#[tokio::test(start_paused = true)]
async fn nodes_arriving_after_re_requests_complete_the_trie() {
    let setup = setup();
    let (root, nodes) = small_trie();
    // the deepest leaf only answers on the third request
    let (slow_hash, slow_bytes) = nodes.last().unwrap().clone();
    script_nodes(&setup, &nodes[..nodes.len() - 1]);
    setup.messenger.script_response_after(
        slow_hash,
        ScriptedResponse {
            topic: "trie_nodes_0".to_string(),
            payload: slow_bytes,
            peer: "alice".to_string(),
        },
        2,
    );

    syncer_with(&setup, config(), 5).sync_trie(root).await.unwrap();
    assert!(setup.storage.contains(&slow_hash).unwrap());
}

#[tokio::test(start_paused = true)]
async fn unserved_node_exhausts_the_request_budget() {
    let setup = setup();
    let (root, nodes) = small_trie();
    // never serve one leaf
    script_nodes(&setup, &nodes[..nodes.len() - 1]);

    let config = TrieSyncConfig { max_hard_cap_for_missing_nodes: 10, ..config() };
    let err = syncer_with(&setup, config, 5).sync_trie(root).await.unwrap_err();
    assert_matches!(err, BootstrapError::TrieSyncStalled { budget: 10 });
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_cleanly() {
    let setup = setup();
    let (root, _) = small_trie();
    // nothing scripted: the sync would spin until its deadline

    let syncer = syncer_with(&setup, config(), 5);
    let canceller = setup.shutdown;
    let sync = tokio::spawn(async move { syncer.sync_trie(root).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    canceller.notify();

    let err = sync.await.unwrap().unwrap_err();
    assert_matches!(err, BootstrapError::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn version_two_spills_deep_nodes_before_completion() {
    let setup = setup();
    let (root, nodes) = small_trie();
    script_nodes(&setup, &nodes);

    let config = TrieSyncConfig { trie_syncer_version: TrieSyncerVersion::V2, ..config() };
    // level cap 0: every non-root node goes straight to the storage manager
    syncer_with(&setup, config, 0).sync_trie(root).await.unwrap();

    for (hash, _) in &nodes {
        assert!(setup.storage.contains(hash).unwrap());
    }
    assert_eq!(setup.storage.snapshots(), vec![root]);
}

#[tokio::test(start_paused = true)]
async fn forged_pool_entry_is_evicted_and_refetched() {
    let setup = setup();
    let (root, nodes) = small_trie();
    script_nodes(&setup, &nodes);

    // poison the pool with bytes that do not hash to the root key
    let forged = encode(&TrieNode::leaf(&[9], b"forged"));
    setup.pools.trie_nodes.insert(root, forged);

    syncer_with(&setup, config(), 5).sync_trie(root).await.unwrap();
    assert_eq!(setup.storage.get(&root).unwrap(), Some(nodes[0].1.clone()));
}

//! Epoch-start meta locator tests.

use crate::{
    test_utils::{FakeIntegrityVerifier, FakeMessenger, FakeSigner},
    BootstrapError, CandidateTallies, EpochStartInterceptorContainer, EpochStartMetaLocator,
    InterceptorContainerArgs, Messenger as _, PoolsHolder, RequestCoordinator, WhitelistHandler,
    EPOCH_START_REQUEST_TOPIC,
};
use assert_matches::assert_matches;
use kn_config::{RequestConfig, WhitelistConfig};
use kn_types::{EpochStartMetaBlock, EpochStartShardData, Hash, Notifier};
use std::{sync::Arc, time::Duration};

struct Setup {
    messenger: Arc<FakeMessenger>,
    locator: EpochStartMetaLocator,
    _container: EpochStartInterceptorContainer,
    shutdown: Notifier,
}

fn setup(quorum: usize) -> Setup {
    let messenger = FakeMessenger::new();
    messenger.create_topic(EPOCH_START_REQUEST_TOPIC).unwrap();
    let pools = PoolsHolder::new();
    let whitelist = Arc::new(WhitelistHandler::new(&WhitelistConfig::default()));
    let tallies = CandidateTallies::new();
    let container = EpochStartInterceptorContainer::new(InterceptorContainerArgs {
        messenger: Arc::clone(&messenger) as Arc<dyn crate::Messenger>,
        pools: Arc::clone(&pools),
        whitelist: Arc::clone(&whitelist),
        integrity: FakeIntegrityVerifier::accepting(),
        signer: FakeSigner::accepting(),
        tallies: Arc::clone(&tallies),
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
    let locator = EpochStartMetaLocator::new(coordinator, pools, tallies, quorum);
    Setup { messenger, locator, _container: container, shutdown: Notifier::new() }
}

fn candidate(epoch: u32, nonce: u64, salt: u8) -> EpochStartMetaBlock {
    EpochStartMetaBlock {
        chain_id: "kestrel-test".to_string(),
        epoch,
        nonce,
        round: epoch as u64 * 1_000,
        root_hash: Hash::compute(&[salt]),
        last_finalized_headers: vec![EpochStartShardData::default()],
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn quorum_confirms_candidate() {
    let setup = setup(2);
    let meta = candidate(5, 4_990, 0);
    setup.messenger.script_epoch_start(meta.clone(), &["alice", "bob"]);

    let found = setup
        .locator
        .sync_epoch_start_meta(Duration::from_secs(60), &setup.shutdown.subscribe())
        .await
        .unwrap();
    assert_eq!(found, meta);
}

#[tokio::test(start_paused = true)]
async fn single_peer_never_reaches_quorum() {
    let setup = setup(2);
    setup.messenger.script_epoch_start(candidate(5, 4_990, 0), &["alice"]);

    let err = setup
        .locator
        .sync_epoch_start_meta(Duration::from_secs(5), &setup.shutdown.subscribe())
        .await
        .unwrap_err();
    assert_matches!(err, BootstrapError::PeerQuorumFailed { quorum: 2 });
}

#[tokio::test(start_paused = true)]
async fn duplicate_answers_from_one_peer_count_once() {
    let setup = setup(2);
    let meta = candidate(5, 4_990, 0);
    // same peer echoing twice is still one vote
    setup.messenger.script_epoch_start(meta.clone(), &["alice", "alice"]);

    let err = setup
        .locator
        .sync_epoch_start_meta(Duration::from_secs(5), &setup.shutdown.subscribe())
        .await
        .unwrap_err();
    assert_matches!(err, BootstrapError::PeerQuorumFailed { .. });
}

#[tokio::test(start_paused = true)]
async fn highest_epoch_wins_tie_break() {
    let setup = setup(2);
    let older = candidate(4, 9_000, 0);
    let newer = candidate(5, 100, 1);
    setup.messenger.script_epoch_start(older, &["alice", "bob"]);
    setup.messenger.script_epoch_start(newer.clone(), &["carol", "dave"]);

    let found = setup
        .locator
        .sync_epoch_start_meta(Duration::from_secs(60), &setup.shutdown.subscribe())
        .await
        .unwrap();
    assert_eq!(found, newer);
}

#[tokio::test(start_paused = true)]
async fn nonce_then_smallest_hash_break_remaining_ties() {
    let setup1 = setup(2);
    let low_nonce = candidate(5, 100, 0);
    let high_nonce = candidate(5, 200, 1);
    setup1.messenger.script_epoch_start(low_nonce, &["alice", "bob"]);
    setup1.messenger.script_epoch_start(high_nonce.clone(), &["carol", "dave"]);

    let found = setup1
        .locator
        .sync_epoch_start_meta(Duration::from_secs(60), &setup1.shutdown.subscribe())
        .await
        .unwrap();
    assert_eq!(found, high_nonce);

    // identical epoch and nonce: the smaller hash is chosen
    let setup2 = setup(2);
    let first = candidate(5, 100, 2);
    let second = candidate(5, 100, 3);
    let smaller =
        if first.hash() < second.hash() { first.clone() } else { second.clone() };
    setup2.messenger.script_epoch_start(first, &["alice", "bob"]);
    setup2.messenger.script_epoch_start(second, &["carol", "dave"]);

    let found = setup2
        .locator
        .sync_epoch_start_meta(Duration::from_secs(60), &setup2.shutdown.subscribe())
        .await
        .unwrap();
    assert_eq!(found, smaller);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_search() {
    let setup = setup(2);
    let shutdown = setup.shutdown.subscribe();
    let canceller = setup.shutdown;

    let locator = setup.locator;
    let search = tokio::spawn(async move {
        locator.sync_epoch_start_meta(Duration::from_secs(600), &shutdown).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    canceller.notify();

    let err = search.await.unwrap().unwrap_err();
    assert_matches!(err, BootstrapError::Cancelled);
}

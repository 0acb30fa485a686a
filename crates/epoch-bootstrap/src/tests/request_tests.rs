//! Request coordinator and whitelist tests.

use crate::{
    test_utils::FakeMessenger, Messenger as _, RequestCoordinator, Topic, WhitelistHandler,
};
use assert_matches::assert_matches;
use kn_config::{RequestConfig, WhitelistConfig};
use kn_types::Hash;
use std::{sync::Arc, time::Duration};

fn hashes(count: usize) -> Vec<Hash> {
    (0..count).map(|index| Hash::compute(&index.to_le_bytes())).collect()
}

fn coordinator(config: RequestConfig) -> (Arc<FakeMessenger>, RequestCoordinator) {
    let messenger = FakeMessenger::new();
    messenger.create_topic(&Topic::MetaHeaders.request_name()).unwrap();
    let whitelist = Arc::new(WhitelistHandler::new(&WhitelistConfig::default()));
    let coordinator = RequestCoordinator::new(
        Arc::clone(&messenger) as Arc<dyn crate::Messenger>,
        whitelist,
        config,
    );
    (messenger, coordinator)
}

#[test]
fn whitelist_admits_within_ttl() {
    let whitelist =
        WhitelistHandler::new(&WhitelistConfig { capacity: 10, ttl: Duration::from_secs(60) });
    let hash = Hash::compute(b"payload");
    assert!(!whitelist.admit(&hash));
    whitelist.add(&[hash]);
    assert!(whitelist.admit(&hash));
    // a hit refreshes, so a second admit still passes
    assert!(whitelist.admit(&hash));
}

#[test]
fn whitelist_expires_entries() {
    let whitelist =
        WhitelistHandler::new(&WhitelistConfig { capacity: 10, ttl: Duration::from_millis(20) });
    let hash = Hash::compute(b"payload");
    whitelist.add(&[hash]);
    std::thread::sleep(Duration::from_millis(40));
    assert!(!whitelist.admit(&hash));
}

#[test]
fn whitelist_evicts_least_recently_used() {
    let whitelist =
        WhitelistHandler::new(&WhitelistConfig { capacity: 2, ttl: Duration::from_secs(60) });
    let all = hashes(3);
    whitelist.add(&all);
    // capacity 2: the oldest entry was evicted, no error raised
    assert_eq!(whitelist.len(), 2);
    assert!(!whitelist.admit(&all[0]));
    assert!(whitelist.admit(&all[1]));
    assert!(whitelist.admit(&all[2]));
}

#[test]
fn repeated_request_within_window_is_dropped() {
    let (messenger, coordinator) = coordinator(RequestConfig {
        time_between_requests: Duration::from_secs(60),
        max_to_request: 100,
    });
    let batch = hashes(3);
    coordinator.request(Topic::MetaHeaders, &batch).unwrap();
    coordinator.request(Topic::MetaHeaders, &batch).unwrap();
    assert_eq!(messenger.broadcast_count(&Topic::MetaHeaders.request_name()), 1);
}

#[test]
fn request_window_reopens_after_cadence() {
    let (messenger, coordinator) = coordinator(RequestConfig {
        time_between_requests: Duration::from_millis(10),
        max_to_request: 100,
    });
    let batch = hashes(1);
    coordinator.request(Topic::MetaHeaders, &batch).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    coordinator.request(Topic::MetaHeaders, &batch).unwrap();
    assert_eq!(messenger.broadcast_count(&Topic::MetaHeaders.request_name()), 2);
}

#[test]
fn oversized_batch_is_chunked() {
    let (messenger, coordinator) = coordinator(RequestConfig {
        time_between_requests: Duration::from_millis(100),
        max_to_request: 100,
    });
    coordinator.request(Topic::MetaHeaders, &hashes(250)).unwrap();
    assert_eq!(messenger.broadcast_count(&Topic::MetaHeaders.request_name()), 3);
}

#[test]
fn requested_hashes_are_whitelisted() {
    let (_messenger, coordinator) = coordinator(RequestConfig::default());
    let batch = hashes(2);
    coordinator.request(Topic::MetaHeaders, &batch).unwrap();
    assert!(coordinator.whitelist().admit(&batch[0]));
    assert!(coordinator.whitelist().admit(&batch[1]));
}

#[test]
fn unknown_topic_is_fatal() {
    let (_messenger, coordinator) = coordinator(RequestConfig::default());
    let err = coordinator.request(Topic::TrieNodes(3), &hashes(1)).unwrap_err();
    assert_matches!(err, crate::BootstrapError::UnknownTopic(_));
}

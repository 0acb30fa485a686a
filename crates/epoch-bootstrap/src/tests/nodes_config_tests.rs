//! Registry derivation and self-shard resolution tests.

use crate::{
    apply_observer_override, derive_nodes_config, resolve_self_shard, test_utils::genesis_with_shards,
    NodeShuffler, SeededShuffler,
};
use kn_types::{
    EpochStartMetaBlock, Hash, ValidatorPubKey, DISABLED_OBSERVER_SHARD, METACHAIN_SHARD_ID,
};

fn metas() -> (EpochStartMetaBlock, EpochStartMetaBlock) {
    let prev = EpochStartMetaBlock { epoch: 4, nonce: 3_990, ..Default::default() };
    let current = EpochStartMetaBlock {
        epoch: 5,
        nonce: 4_990,
        prev_epoch_start_hash: prev.hash(),
        ..Default::default()
    };
    (current, prev)
}

#[test]
fn derivation_is_deterministic() {
    let genesis = genesis_with_shards(3, 4);
    let (current, prev) = metas();
    let first = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);
    let second = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);
    assert_eq!(first, second);
    assert_eq!(first.current_epoch, 5);
}

#[test]
fn different_checkpoints_shuffle_differently() {
    let genesis = genesis_with_shards(3, 4);
    let (current, prev) = metas();
    let other_current = EpochStartMetaBlock { nonce: 5_000, ..current.clone() };
    let first = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);
    let second = derive_nodes_config(&genesis, &SeededShuffler, &other_current, &prev);
    assert_ne!(first, second);
}

#[test]
fn shuffle_preserves_per_shard_population() {
    let mut genesis = genesis_with_shards(3, 4);
    // make the waiting lists non-trivial
    genesis.waiting = genesis_with_shards(3, 2).eligible;
    let (current, prev) = metas();

    let registry = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);
    for shard in 0..3u32 {
        assert_eq!(registry.shard_population(shard), genesis.shard_population(shard));
        assert_eq!(registry.eligible[&shard].len(), 4);
        assert_eq!(registry.waiting[&shard].len(), 2);
    }
}

#[test]
fn shuffle_moves_no_keys_in_or_out() {
    let genesis = genesis_with_shards(2, 3);
    let (current, prev) = metas();
    let registry = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);

    let mut before: Vec<ValidatorPubKey> =
        genesis.eligible.values().flatten().map(|validator| validator.pub_key).collect();
    let mut after: Vec<ValidatorPubKey> =
        registry.eligible.values().flatten().map(|validator| validator.pub_key).collect();
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[test]
fn validator_key_pins_the_shard() {
    let genesis = genesis_with_shards(2, 3);
    let (current, prev) = metas();
    let registry = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);

    let some_key = registry.eligible[&1][0].pub_key;
    let resolution = resolve_self_shard(&registry, &some_key, DISABLED_OBSERVER_SHARD, 2, 0);
    assert!(resolution.is_validator);
    assert_eq!(resolution.shard_id, 1);
}

#[test]
fn observer_follows_destination_shard() {
    let genesis = genesis_with_shards(2, 3);
    let (current, prev) = metas();
    let registry = derive_nodes_config(&genesis, &SeededShuffler, &current, &prev);
    let outsider = ValidatorPubKey::filled(200);

    let resolution = resolve_self_shard(&registry, &outsider, 1, 2, 0);
    assert!(!resolution.is_validator);
    assert_eq!(resolution.shard_id, 1);

    // the metachain is a valid observer destination
    let resolution = resolve_self_shard(&registry, &outsider, METACHAIN_SHARD_ID, 2, 0);
    assert_eq!(resolution.shard_id, METACHAIN_SHARD_ID);

    // disabled or out-of-range destinations fall back to the genesis shard
    let resolution = resolve_self_shard(&registry, &outsider, DISABLED_OBSERVER_SHARD, 2, 0);
    assert_eq!(resolution.shard_id, 0);
    let resolution = resolve_self_shard(&registry, &outsider, 7, 2, 0);
    assert_eq!(resolution.shard_id, 0);
}

#[test]
fn observer_override_never_applies_to_validators() {
    assert_eq!(apply_observer_override(1, 0, true), 1);
    assert_eq!(apply_observer_override(1, 0, false), 0);
    assert_eq!(apply_observer_override(1, DISABLED_OBSERVER_SHARD, false), 1);
}

#[test]
fn same_seed_same_assignment_across_shufflers() {
    let genesis = genesis_with_shards(2, 3);
    let seed = Hash::compute(b"seed");
    let first = SeededShuffler.shuffle(9, &genesis.eligible, &genesis.waiting, &seed);
    let second = SeededShuffler.shuffle(9, &genesis.eligible, &genesis.waiting, &seed);
    assert_eq!(first, second);
}

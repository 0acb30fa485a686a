//! Validator public keys and the per-epoch nodes-coordinator registry.

use crate::{Epoch, ShardId};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

/// Length in bytes of a BLS public key.
pub const PUBLIC_KEY_LENGTH: usize = 96;

/// A validator's BLS public key.
///
/// Opaque to the bootstrap engine; key operations live with the crypto
/// collaborators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidatorPubKey([u8; PUBLIC_KEY_LENGTH]);

impl ValidatorPubKey {
    /// Wrap raw key bytes.
    pub const fn new(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// A key with every byte set to `fill`, for tests and fixtures.
    pub fn filled(fill: u8) -> Self {
        Self([fill; PUBLIC_KEY_LENGTH])
    }
}

impl Default for ValidatorPubKey {
    fn default() -> Self {
        Self([0u8; PUBLIC_KEY_LENGTH])
    }
}

impl fmt::Debug for ValidatorPubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

impl fmt::Display for ValidatorPubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Serialize for ValidatorPubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ValidatorPubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> de::Visitor<'de> for KeyVisitor {
            type Value = ValidatorPubKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{PUBLIC_KEY_LENGTH} public key bytes")
            }

            fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<Self::Value, E> {
                let bytes: [u8; PUBLIC_KEY_LENGTH] =
                    bytes.try_into().map_err(|_| E::invalid_length(bytes.len(), &self))?;
                Ok(ValidatorPubKey(bytes))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
                for (index, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(index, &self))?;
                }
                Ok(ValidatorPubKey(bytes))
            }
        }

        deserializer.deserialize_bytes(KeyVisitor)
    }
}

/// One registry entry: a key plus its selection chances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// The validator's public key.
    pub pub_key: ValidatorPubKey,
    /// Selection weight fed to the shuffler.
    pub chances: u32,
}

impl Validator {
    /// A validator with the default chance weight.
    pub fn new(pub_key: ValidatorPubKey) -> Self {
        Self { pub_key, chances: 1 }
    }
}

/// Per-epoch assignment of validators to shards and roles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodesCoordinatorRegistry {
    /// The epoch this registry is valid for.
    pub current_epoch: Epoch,
    /// Active validators per shard, in consensus order.
    pub eligible: BTreeMap<ShardId, Vec<Validator>>,
    /// Validators queued to become eligible, per shard.
    pub waiting: BTreeMap<ShardId, Vec<Validator>>,
}

impl NodesCoordinatorRegistry {
    /// The shard whose eligible or waiting list contains `key`.
    pub fn shard_of(&self, key: &ValidatorPubKey) -> Option<ShardId> {
        let hit = |lists: &BTreeMap<ShardId, Vec<Validator>>| {
            lists.iter().find_map(|(shard, validators)| {
                validators.iter().any(|validator| &validator.pub_key == key).then_some(*shard)
            })
        };
        hit(&self.eligible).or_else(|| hit(&self.waiting))
    }

    /// Combined eligible + waiting count for one shard.
    pub fn shard_population(&self, shard: ShardId) -> usize {
        let count = |lists: &BTreeMap<ShardId, Vec<Validator>>| {
            lists.get(&shard).map(Vec::len).unwrap_or_default()
        };
        count(&self.eligible) + count(&self.waiting)
    }

    /// All shard ids the registry covers.
    pub fn shards(&self) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> =
            self.eligible.keys().chain(self.waiting.keys()).copied().collect();
        shards.sort_unstable();
        shards.dedup();
        shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodesCoordinatorRegistry {
        let mut eligible = BTreeMap::new();
        eligible.insert(0, vec![Validator::new(ValidatorPubKey::filled(1))]);
        let mut waiting = BTreeMap::new();
        waiting.insert(1, vec![Validator::new(ValidatorPubKey::filled(2))]);
        NodesCoordinatorRegistry { current_epoch: 3, eligible, waiting }
    }

    #[test]
    fn shard_of_checks_both_lists() {
        let registry = registry();
        assert_eq!(registry.shard_of(&ValidatorPubKey::filled(1)), Some(0));
        assert_eq!(registry.shard_of(&ValidatorPubKey::filled(2)), Some(1));
        assert_eq!(registry.shard_of(&ValidatorPubKey::filled(9)), None);
    }

    #[test]
    fn pub_key_codec_round_trip() {
        let key = ValidatorPubKey::filled(7);
        let bytes = crate::encode(&key);
        let decoded: ValidatorPubKey = crate::decode(&bytes).unwrap();
        assert_eq!(key, decoded);
    }
}

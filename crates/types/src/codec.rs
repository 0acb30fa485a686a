//! Canonical byte encoding for network payloads and storage values.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Failure to decode a payload into the expected shape.
#[derive(Debug, Error)]
#[error("failed to decode payload: {0}")]
pub struct DecodeError(#[from] bcs::Error);

/// Encode a value into canonical bytes.
///
/// Encoding our own types cannot fail; a failure here is a bug in the type
/// definition, not a runtime condition.
pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bcs::to_bytes(value).expect("encodable type")
}

/// Decode canonical bytes into a value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    bcs::from_bytes(bytes).map_err(Into::into)
}

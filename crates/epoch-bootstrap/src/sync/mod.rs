//! Synchronisers pulling content-addressed payloads from the network.

mod headers;
mod mini_blocks;
mod trie;

pub use headers::*;
pub use mini_blocks::*;
pub use trie::*;

use crate::{BootstrapError, BootstrapResult, TypedPool};
use kn_types::{Hash, Noticer};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::trace;

/// Request-wait-collect loop shared by the header and mini-block
/// synchronisers.
///
/// Issues `request` for every target up front, then loops collecting from
/// `pool` and re-requesting the misses on the `cadence` until the full set
/// is present or `timeout` expires. Returns the complete map or fails;
/// callers never see a partial result.
pub(crate) async fn collect_by_hash<T, F>(
    pool: &TypedPool<T>,
    targets: &[Hash],
    request: F,
    cadence: Duration,
    timeout: Duration,
    shutdown: &Noticer,
) -> BootstrapResult<HashMap<Hash, Arc<T>>>
where
    F: Fn(&[Hash]) -> BootstrapResult<()>,
{
    let mut found: HashMap<Hash, Arc<T>> = HashMap::with_capacity(targets.len());
    if targets.is_empty() {
        return Ok(found);
    }

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    request(targets)?;

    loop {
        // register the wait handle before polling so an insert racing the
        // poll cannot be missed
        let inserted = pool.inserted();
        tokio::pin!(inserted);
        inserted.as_mut().enable();

        for hash in targets {
            if !found.contains_key(hash) {
                if let Some(value) = pool.get(hash) {
                    trace!(target: "bootstrap::sync", ?hash, "payload collected");
                    found.insert(*hash, value);
                }
            }
        }

        let missing: Vec<Hash> =
            targets.iter().filter(|hash| !found.contains_key(hash)).copied().collect();
        if missing.is_empty() {
            return Ok(found);
        }

        tokio::select! {
            _ = &mut inserted => {}
            _ = tokio::time::sleep(cadence) => request(&missing)?,
            _ = &mut deadline => return Err(BootstrapError::Timeout { missing }),
            _ = shutdown.notified() => return Err(BootstrapError::Cancelled),
        }
    }
}

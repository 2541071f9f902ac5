//! Retention: keep the newest `keep` records, drop the rest.

use std::cmp::Ordering;

use memstore_types::{Record, Store};
use serde::Serialize;

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompactReport {
    pub kept: usize,
    pub removed: usize,
}

/// Newest first by `ts`; records created in the same second go by larger id.
pub fn newest_first(a: &Record, b: &Record) -> Ordering {
    b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id))
}

/// Retain the `keep` newest records of `store`.
///
/// When the store already holds `keep` records or fewer it is left exactly
/// as it was, order included. Otherwise the survivors end up sorted newest
/// first. `keep == 0` empties the store.
pub fn compact(store: &mut Store, keep: usize) -> CompactReport {
    let before = store.len();
    if before <= keep {
        return CompactReport {
            kept: before,
            removed: 0,
        };
    }
    store.records.sort_by(newest_first);
    store.records.truncate(keep);
    CompactReport {
        kept: keep,
        removed: before - keep,
    }
}

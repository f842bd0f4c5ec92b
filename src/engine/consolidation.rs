//! ARRAYMETA - Metadata Consolidation
//! Merges the metadata fragments of an array into a single fragment
//! that holds only the final surviving state.
//!
//! ## Algorithm
//! 1. Clamp `max_timestamp` below any fragment write still in flight, then
//!    list the fragments visible at it
//! 2. Replay them into a `MetadataIndex` (later fragments override earlier)
//! 3. Drop tombstones: the merged fragment only holds live entries
//! 4. Write the live entries, in ordinal order, as one fragment covering
//!    `[earliest input start, max_timestamp]`
//!
//! Inputs are left in place. Reads before `max_timestamp` keep using
//! them; reads at or after it use the consolidated fragment instead.

use std::path::Path;

use crate::error::Result;
use crate::types::{Entry, Timestamp};

use super::crypto::EncryptionKey;
use super::fragment::{FragmentHandle, FragmentStore};
use super::index::MetadataIndex;
use super::Context;

/// Outcome of one consolidation run.
#[derive(Debug, Clone)]
pub struct ConsolidationReport {
    /// Number of fragments merged.
    pub inputs: usize,
    /// Live entries written to the consolidated fragment.
    pub live_entries: usize,
    /// Tombstones and overwritten entries that did not survive.
    pub dropped_entries: usize,
    /// The new fragment, or `None` when there was nothing to merge.
    pub fragment: Option<FragmentHandle>,
}

/// Merge the entry batches of several fragments, oldest first, into the
/// live entries of the final state.
pub fn merge_fragments(fragments: Vec<Vec<Entry>>) -> Vec<Entry> {
    MetadataIndex::build(fragments).to_entries()
}

/// Consolidate every fragment of the array at `uri` visible at `max_timestamp`.
pub fn consolidate(
    ctx: &Context,
    uri: impl AsRef<Path>,
    key: Option<&EncryptionKey>,
    max_timestamp: Timestamp,
) -> Result<ConsolidationReport> {
    let uri = uri.as_ref();
    let store = FragmentStore::open(ctx, uri, key)?;

    let durable = ctx.timestamps().durable_bound();
    if durable < max_timestamp {
        log::debug!(
            "Consolidating {:?} up to {} instead of {}: fragment writes in flight",
            uri,
            durable,
            max_timestamp
        );
    }
    let max_timestamp = max_timestamp.min(durable);
    let handles = store.list_fragments(max_timestamp)?;

    let Some(earliest) = handles.first().map(FragmentHandle::start) else {
        log::info!("No metadata fragments to consolidate in {:?}", uri);
        return Ok(ConsolidationReport {
            inputs: 0,
            live_entries: 0,
            dropped_entries: 0,
            fragment: None,
        });
    };

    let fragments = handles
        .iter()
        .map(|h| store.read_fragment(h))
        .collect::<Result<Vec<_>>>()?;
    let total_entries: usize = fragments.iter().map(Vec::len).sum();

    let live = merge_fragments(fragments);
    let fragment = store.write_range(&live, earliest, max_timestamp)?;
    ctx.metrics().record_consolidation();

    log::info!(
        "Consolidated {} metadata fragments of {:?} into {:?} ({} live entries)",
        handles.len(),
        uri,
        fragment.path().file_name().unwrap_or_default(),
        live.len()
    );

    Ok(ConsolidationReport {
        inputs: handles.len(),
        live_entries: live.len(),
        dropped_entries: total_entries - live.len(),
        fragment: Some(fragment),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::clock::ManualClock;
    use crate::engine::schema::ArrayHeader;
    use crate::types::MetadataValue;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path()).with_sync_writes(false);
        let ctx = Context::with_clock(config, Arc::new(ManualClock::new(1_000))).unwrap();
        ArrayHeader::create(&ctx.array_path("arr"), None, 1_000, false).unwrap();
        (dir, ctx)
    }

    fn put(key: &str, v: i32) -> Entry {
        Entry::put(
            key.as_bytes().to_vec(),
            MetadataValue::from_slice(&[v]).unwrap(),
        )
    }

    #[test]
    fn test_merge_later_overrides_earlier() {
        let f1 = vec![put("a", 1), put("b", 2)];
        let f2 = vec![put("a", 10), put("c", 3)];

        let merged = merge_fragments(vec![f1, f2]);

        assert_eq!(merged, vec![put("a", 10), put("b", 2), put("c", 3)]);
    }

    #[test]
    fn test_merge_drops_tombstones() {
        let f1 = vec![put("a", 1), put("b", 2)];
        let f2 = vec![Entry::delete(b"a".to_vec()), put("c", 3)];

        let merged = merge_fragments(vec![f1, f2]);

        assert_eq!(merged, vec![put("b", 2), put("c", 3)]);
        assert!(merged.iter().all(|e| !e.is_tombstone()));
    }

    #[test]
    fn test_merge_everything_deleted() {
        let f1 = vec![put("a", 1)];
        let f2 = vec![Entry::delete(b"a".to_vec())];
        assert!(merge_fragments(vec![f1, f2]).is_empty());
    }

    #[test]
    fn test_consolidate_up_to_max_timestamp() {
        let (_dir, ctx) = setup();
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        store.write_fragment(&[put("a", 1)]).unwrap();
        store.write_fragment(&[put("b", 2)]).unwrap();

        let max = ctx.clock().next_timestamp();
        let report = consolidate(&ctx, "arr", None, max).unwrap();
        let fragment = report.fragment.unwrap();
        assert_eq!(report.inputs, 2);
        assert_eq!((fragment.start(), fragment.end()), (1_001, max));
    }

    #[test]
    fn test_in_flight_write_stays_visible_after_consolidation() {
        let (_dir, ctx) = setup();
        let store = FragmentStore::open(&ctx, "arr", None).unwrap();
        store.write_fragment(&[put("first", 1)]).unwrap();

        // A concurrent session has its timestamp but no file yet.
        let reservation = ctx.timestamps().reserve();
        let late = reservation.timestamp();

        let max = ctx.clock().next_timestamp();
        assert!(late < max);
        let report = consolidate(&ctx, "arr", None, max).unwrap();
        assert!(report.fragment.unwrap().end() < late);

        store.write_range(&[put("late", 2)], late, late).unwrap();
        drop(reservation);

        let index = store.load_index(ctx.now_ms()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.get(b"late").is_some());

        // A second pass picks the landed write up.
        consolidate(&ctx, "arr", None, ctx.clock().next_timestamp()).unwrap();
        let index = store.load_index(ctx.now_ms()).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.get(b"late").is_some());
    }
}

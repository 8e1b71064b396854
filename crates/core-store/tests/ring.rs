//! Ring and range-cache behavior across the public store API.

use core_store::DataStore;
use core_store::limits::COL_ROW_ID;
use proptest::prelude::*;

/// Streaming overflow keeps the newest `capacity` rows and shifts ids.
#[test]
fn ring_overflow_keeps_newest_rows() {
    let mut s = DataStore::new();
    assert!(s.alloc(0, 1, 4, false));
    let cap = s.dataset(0).unwrap().capacity();
    let total = cap + 1;
    for i in 0..total {
        assert!(s.insert(0, &[(i + 1) as f64]));
    }
    let ds = s.dataset(0).unwrap();
    assert_eq!(ds.head_id(), 1);
    assert_eq!(ds.tail_id(), total as u64);
    let mut cur = ds.cursor();
    let mut got = Vec::new();
    let ds = s.dataset_mut(0).unwrap();
    while let Some(row) = ds.read(&mut cur) {
        got.push(row[0]);
    }
    let want: Vec<f64> = (2..=total).map(|v| v as f64).collect();
    assert_eq!(got, want);
}

proptest! {
    /// Logical ids stay dense and the valid count never exceeds capacity,
    /// regardless of insert volume.
    #[test]
    fn logical_ids_stay_dense(inserts in 0usize..5000) {
        let mut s = DataStore::new();
        prop_assert!(s.alloc(0, 1, 32, false));
        for i in 0..inserts {
            prop_assert!(s.insert(0, &[i as f64]));
        }
        let ds = s.dataset(0).unwrap();
        let cap = ds.capacity();
        prop_assert_eq!(ds.len(), inserts.min(cap));
        prop_assert_eq!(ds.tail_id() - ds.head_id(), ds.len() as u64);
        let mut cur = ds.cursor();
        let mut expect_id = ds.head_id();
        let ds = s.dataset_mut(0).unwrap();
        loop {
            let id = cur.id;
            let Some(row) = ds.read(&mut cur) else { break };
            prop_assert_eq!(id, expect_id);
            // Value encodes the insert ordinal, which is the logical id.
            prop_assert_eq!(row[0] as u64, id);
            expect_id += 1;
        }
        prop_assert_eq!(expect_id, ds.tail_id());
    }

    /// The fetched aggregate equals the true extent over the valid span,
    /// with or without chunk compression.
    #[test]
    fn fetched_range_matches_direct_scan(
        values in proptest::collection::vec(-1e6f64..1e6, 1..400),
        compress in proptest::bool::ANY,
    ) {
        let mut s = DataStore::new();
        prop_assert!(s.alloc(0, 1, 64, compress));
        for v in &values {
            prop_assert!(s.insert(0, &[*v]));
        }
        let cap = s.dataset(0).unwrap().capacity();
        let live = &values[values.len().saturating_sub(cap)..];
        let want_min = live.iter().cloned().fold(f64::INFINITY, f64::min);
        let want_max = live.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let (fmin, fmax) = s.column_range(0, 0).unwrap();
        prop_assert_eq!(fmin, want_min);
        prop_assert_eq!(fmax, want_max);
    }

    /// A write leaves the touched chunk uncomputed until the next fetch.
    #[test]
    fn write_marks_chunk_stale(prefill in 1usize..200) {
        let mut s = DataStore::new();
        prop_assert!(s.alloc(0, 1, 256, false));
        for i in 0..prefill {
            s.insert(0, &[i as f64]);
        }
        s.ensure_range(0, 0);
        let ds = s.dataset(0).unwrap();
        let mid = ds.head_id() + (ds.len() as u64) / 2;
        let mut cur = ds.cursor_at(mid);
        let touched = ds.chunk_of_index(cur.index());
        let row = s.write_row(0, &mut cur).unwrap();
        row[0] = 1e9;
        let e = s.range_entry(0, 0).unwrap();
        prop_assert!(!e.chunk(touched).computed);
        prop_assert!(!e.cached);
        s.ensure_range(0, 0);
        let (_, fmax) = s.column_range(0, 0).unwrap();
        prop_assert_eq!(fmax, 1e9);
    }
}

#[test]
fn row_id_range_follows_eviction() {
    let mut s = DataStore::new();
    assert!(s.alloc(0, 1, 8, false));
    let cap = s.dataset(0).unwrap().capacity();
    for i in 0..cap + 5 {
        s.insert(0, &[i as f64]);
    }
    let (lo, hi) = s.column_range(0, COL_ROW_ID).unwrap();
    assert_eq!(lo, 5.0);
    assert_eq!(hi, (cap + 4) as f64);
}

//! Derived-column pipeline.
//!
//! Every dataset carries [`DERIVE_SLOT_MAX`] derive slots; slot `s` owns
//! column `column_n + s` of the row. [`DeriveTable`] holds the operator of
//! each slot and drives three computation paths:
//!
//! - [`extend`](DeriveTable::extend): the unbounded real-time pass. Applies
//!   every streaming slot, in index order per row, to the span between the
//!   dataset's derive watermark and its tail, then bumps the watermark.
//!   Called after inserts; running state carries across calls.
//! - [`compute_full`](DeriveTable::compute_full): full-span recompute of one
//!   slot with reset state. Batch operators (resample, polynomial fit) only
//!   ever run here. Callers must `extend` first so the watermark sits at the
//!   tail; otherwise the next extension would re-step freshly computed rows.
//! - [`sweep`](DeriveTable::sweep): fixpoint garbage collection. A slot
//!   stays live while its owned column is read by a figure or by another
//!   live slot; everything else is freed and its range entries released.
//!
//! Slots are evaluated in index order and never topologically sorted;
//! consumers arrange indices so dependencies precede dependents. A slot may
//! not read its own column. `Scale` and `TimeUnwrap` allocations deduplicate
//! by (source, parameters) so slave-axis attachment cannot grow the table
//! without bound.

pub mod batch;
pub mod op;

pub use op::{BinaryKind, DeriveOp, POLY_DEGREE_MAX, ViewBox};

use batch::{run_polyfit, run_resample};
use core_store::DataStore;
use core_store::limits::{COL_ROW_ID, DATASET_MAX, DERIVE_SLOT_MAX};
use core_surface::LeastSquares;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Operators of every derive slot of every dataset.
#[derive(Debug)]
pub struct DeriveTable {
    slots: Box<[Box<[DeriveOp]>]>,
}

impl Default for DeriveTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DeriveTable {
    pub fn new() -> Self {
        Self {
            slots: (0..DATASET_MAX)
                .map(|_| {
                    (0..DERIVE_SLOT_MAX)
                        .map(|_| DeriveOp::Free)
                        .collect::<Vec<_>>()
                        .into_boxed_slice()
                })
                .collect(),
        }
    }

    pub fn op(&self, d: usize, s: usize) -> Option<&DeriveOp> {
        self.slots.get(d)?.get(s)
    }

    /// Column owned by slot `s` of dataset `d`.
    pub fn owned_col(store: &DataStore, d: usize, s: usize) -> Option<i32> {
        Some((store.dataset(d)?.column_n() + s) as i32)
    }

    /// Allocate a slot for `op`, deduplicating `Scale`/`TimeUnwrap` against
    /// live slots. Returns the slot index, or `None` (logged) when the table
    /// is full or the operator is invalid.
    pub fn alloc(&mut self, store: &DataStore, d: usize, op: DeriveOp) -> Option<usize> {
        let Some(ds) = store.dataset(d) else {
            warn!(target: "derive", d, "derive alloc on unknown dataset");
            return None;
        };
        if op.is_free() {
            return None;
        }
        for (sd, c) in op.sources(d) {
            let Some(src_ds) = store.dataset(sd) else {
                warn!(target: "derive", d, src = sd, "derive source dataset missing");
                return None;
            };
            if c < COL_ROW_ID || c >= src_ds.row_width() as i32 {
                warn!(target: "derive", d, c, "derive source column out of range");
                return None;
            }
        }
        for s in 0..DERIVE_SLOT_MAX {
            if self.slots[d][s].dedups_with(&op) {
                debug!(target: "derive", d, s, "derive slot deduplicated");
                return Some(s);
            }
        }
        let column_n = ds.column_n();
        for s in 0..DERIVE_SLOT_MAX {
            if !self.slots[d][s].is_free() {
                continue;
            }
            let own = (column_n + s) as i32;
            if op.sources(d).iter().any(|&(sd, c)| sd == d && c == own) {
                warn!(target: "derive", d, s, "derive slot may not read itself");
                return None;
            }
            self.slots[d][s] = op;
            debug!(target: "derive", d, s, "derive slot allocated");
            return Some(s);
        }
        warn!(target: "derive", d, "no free derive slot");
        None
    }

    /// Free slot `s` and release the range entries of its column.
    pub fn free(&mut self, store: &mut DataStore, d: usize, s: usize) {
        if let Some(op) = self.slots.get_mut(d).and_then(|t| t.get_mut(s)) {
            if !op.is_free() {
                *op = DeriveOp::Free;
                if let Some(col) = Self::owned_col(store, d, s) {
                    store.release_derived_ranges(d, col as usize);
                }
                debug!(target: "derive", d, s, "derive slot freed");
            }
        }
    }

    /// Apply all streaming slots to the unapplied span and bump the
    /// watermark. No-op when the watermark already sits at the tail.
    pub fn extend(&mut self, store: &mut DataStore, d: usize) {
        let Some(ds) = store.dataset(d) else {
            return;
        };
        let column_n = ds.column_n();
        let (start, end) = (ds.applied(), ds.tail_id());
        if start >= end {
            return;
        }
        let active: SmallVec<[usize; DERIVE_SLOT_MAX]> = (0..DERIVE_SLOT_MAX)
            .filter(|&s| {
                let op = &self.slots[d][s];
                !op.is_free() && !op.is_batch()
            })
            .collect();
        let mut cur = ds.cursor_at(start);
        if !active.is_empty() {
            while !cur.done() {
                let id = cur.id;
                let Some(row) = store.write_row(d, &mut cur) else {
                    break;
                };
                for &s in &active {
                    let out = self.slots[d][s].step(row, id);
                    row[column_n + s] = out;
                }
            }
        }
        if let Some(ds) = store.dataset_mut(d) {
            ds.set_applied(end);
        }
    }

    /// Recompute slot `s` over the full valid span with reset state. The
    /// solver is consulted only by `Polyfit`. Returns false when the slot is
    /// free or a batch run failed (the column is left as it was).
    pub fn compute_full(
        &mut self,
        store: &mut DataStore,
        d: usize,
        s: usize,
        solver: Option<&mut dyn LeastSquares>,
    ) -> bool {
        let Some(column_n) = store.dataset(d).map(|ds| ds.column_n()) else {
            return false;
        };
        let Some(op) = self.slots.get_mut(d).and_then(|t| t.get_mut(s)) else {
            return false;
        };
        if op.is_free() {
            return false;
        }
        op.reset_state();
        let out_col = column_n + s;
        match op {
            DeriveOp::Resample {
                src_data,
                src_time,
                src_value,
                time,
            } => {
                let (sd, st, sv, t) = (*src_data, *src_time, *src_value, *time);
                run_resample(store, d, out_col, sd, st, sv, t)
            }
            DeriveOp::Polyfit { .. } => {
                let Some(solver) = solver else {
                    warn!(target: "derive", d, s, "polynomial fit without a solver");
                    return false;
                };
                run_polyfit(store, d, out_col, op, solver)
            }
            _ => {
                let Some(ds) = store.dataset(d) else {
                    return false;
                };
                let mut cur = ds.cursor();
                while !cur.done() {
                    let id = cur.id;
                    let Some(row) = store.write_row(d, &mut cur) else {
                        break;
                    };
                    let out = op.step(row, id);
                    row[out_col] = out;
                }
                true
            }
        }
    }

    /// Free every slot whose owned column is read by no figure and by no
    /// other live slot. `referenced` lists the `(dataset, column)` pairs the
    /// figures read; the pass iterates to a fixpoint since freeing one slot
    /// can orphan another.
    pub fn sweep(&mut self, store: &mut DataStore, referenced: &[(usize, i32)]) {
        loop {
            let mut dead: SmallVec<[(usize, usize); 8]> = SmallVec::new();
            for d in 0..DATASET_MAX {
                let Some(column_n) = store.dataset(d).map(|ds| ds.column_n()) else {
                    continue;
                };
                for s in 0..DERIVE_SLOT_MAX {
                    if self.slots[d][s].is_free() {
                        continue;
                    }
                    let col = (column_n + s) as i32;
                    let by_figure = referenced.iter().any(|&(rd, rc)| rd == d && rc == col);
                    let by_slot = (0..DATASET_MAX).any(|d2| {
                        (0..DERIVE_SLOT_MAX).any(|s2| {
                            (d2 != d || s2 != s)
                                && !self.slots[d2][s2].is_free()
                                && self.slots[d2][s2]
                                    .sources(d2)
                                    .iter()
                                    .any(|&(sd, sc)| sd == d && sc == col)
                        })
                    });
                    if !by_figure && !by_slot {
                        dead.push((d, s));
                    }
                }
            }
            if dead.is_empty() {
                break;
            }
            for (d, s) in dead {
                debug!(target: "derive", d, s, "derive slot swept");
                self.free(store, d, s);
            }
        }
    }

    /// Find a live slot equal to `op` under dedup rules, without allocating.
    pub fn find(&self, d: usize, op: &DeriveOp) -> Option<usize> {
        (0..DERIVE_SLOT_MAX).find(|&s| self.slots[d][s].dedups_with(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_one(columns: usize, rows: usize) -> DataStore {
        let mut s = DataStore::new();
        assert!(s.alloc(0, columns, rows, false));
        s
    }

    fn scale(src: i32, a: f64, b: f64) -> DeriveOp {
        DeriveOp::Scale {
            src,
            scale: a,
            offset: b,
        }
    }

    #[test]
    fn alloc_dedups_scale() {
        let store = store_one(2, 16);
        let mut t = DeriveTable::new();
        let a = t.alloc(&store, 0, scale(0, 2.0, 0.0)).unwrap();
        let b = t.alloc(&store, 0, scale(0, 2.0, 0.0)).unwrap();
        let c = t.alloc(&store, 0, scale(0, 3.0, 0.0)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn alloc_rejects_self_read() {
        let store = store_one(2, 16);
        let mut t = DeriveTable::new();
        // Slot 0 owns column 2; reading column 2 from slot 0 is a self-read.
        assert!(t.alloc(&store, 0, scale(2, 1.0, 0.0)).is_none());
    }

    #[test]
    fn alloc_exhausts_table() {
        let store = store_one(2, 16);
        let mut t = DeriveTable::new();
        for i in 0..DERIVE_SLOT_MAX {
            assert!(t.alloc(&store, 0, scale(0, i as f64 + 1.0, 0.0)).is_some());
        }
        assert!(t.alloc(&store, 0, scale(1, 100.0, 0.0)).is_none());
    }

    #[test]
    fn extend_applies_in_index_order_and_bumps_watermark() {
        let mut store = store_one(1, 64);
        let mut t = DeriveTable::new();
        // Slot 0 doubles the input, slot 1 accumulates slot 0's output.
        let s0 = t.alloc(&store, 0, scale(0, 2.0, 0.0)).unwrap();
        let s1 = t
            .alloc(
                &store,
                0,
                DeriveOp::FilterCum {
                    src: 1, // column owned by slot 0
                    sum: 0.0,
                },
            )
            .unwrap();
        assert_eq!((s0, s1), (0, 1));
        for i in 1..=4 {
            store.insert(0, &[i as f64]);
        }
        t.extend(&mut store, 0);
        let ds = store.dataset(0).unwrap();
        assert_eq!(ds.applied(), ds.tail_id());
        let row = store.row_at(0, 3).unwrap();
        assert_eq!(row[1], 8.0);
        assert_eq!(row[2], 2.0 + 4.0 + 6.0 + 8.0);
    }

    #[test]
    fn extend_preserves_state_across_calls() {
        let mut store = store_one(1, 64);
        let mut t = DeriveTable::new();
        t.alloc(
            &store,
            0,
            DeriveOp::FilterCum { src: 0, sum: 0.0 },
        )
        .unwrap();
        store.insert(0, &[1.0]);
        t.extend(&mut store, 0);
        store.insert(0, &[2.0]);
        t.extend(&mut store, 0);
        assert_eq!(store.row_at(0, 1).unwrap()[1], 3.0);
    }

    #[test]
    fn sweep_frees_unreferenced_chains() {
        let mut store = store_one(2, 16);
        let mut t = DeriveTable::new();
        let s0 = t.alloc(&store, 0, scale(0, 2.0, 0.0)).unwrap();
        let s1 = t
            .alloc(
                &store,
                0,
                DeriveOp::FilterDiff {
                    src: 2, // slot 0's column
                    prev: f64::NAN,
                },
            )
            .unwrap();
        // Figure reads only slot 1's column: both slots stay live.
        let col1 = DeriveTable::owned_col(&store, 0, s1).unwrap();
        t.sweep(&mut store, &[(0, col1)]);
        assert!(!t.op(0, s0).unwrap().is_free());
        assert!(!t.op(0, s1).unwrap().is_free());
        // Nothing referenced: the whole chain dies in one fixpoint pass.
        t.sweep(&mut store, &[]);
        assert!(t.op(0, s0).unwrap().is_free());
        assert!(t.op(0, s1).unwrap().is_free());
    }

    #[test]
    fn compute_full_resets_state() {
        let mut store = store_one(1, 64);
        let mut t = DeriveTable::new();
        let s = t
            .alloc(
                &store,
                0,
                DeriveOp::FilterCum { src: 0, sum: 0.0 },
            )
            .unwrap();
        for _ in 0..3 {
            store.insert(0, &[1.0]);
        }
        t.extend(&mut store, 0);
        assert_eq!(store.row_at(0, 2).unwrap()[1], 3.0);
        // Recompute from scratch: same result, not doubled.
        assert!(t.compute_full(&mut store, 0, s, None));
        assert_eq!(store.row_at(0, 2).unwrap()[1], 3.0);
    }
}

//! Chunked, ring-buffered column storage with range caching.
//!
//! `core-store` owns the raw samples of every dataset and the caches layered
//! directly over them:
//!
//! - [`Dataset`]: a ring of rows over fixed-geometry chunks, optionally LZ4
//!   compressed per chunk with a small rotating decompressed-buffer cache;
//! - the range cache: per `(dataset, column, chunk)` finite min/max entries
//!   used for auto-scaling and level-of-detail culling, invalidated on write;
//! - the slice query: nearest-in-value row lookup steered by the range cache;
//! - column [`Group`]s and the per-dataset column→group map.
//!
//! [`DataStore`] is the single facade: every mutation flows through it so the
//! write paths can invalidate range entries in one place. The engine is
//! single-threaded cooperative by contract; nothing here blocks and no
//! operation allocates beyond the fixed capacity bounds in [`limits`].
//!
//! Misuse (bad dataset/column handles, arity mismatches) is logged and the
//! call is a no-op per the engine-wide error contract; only the log channel
//! sees the failure.

mod chunk;
pub mod data;
pub mod group;
pub mod limits;
pub mod rcache;
pub mod slice;

pub use data::{Dataset, RowCursor, col_value};
pub use group::Group;
pub use rcache::{ChunkRange, RangeEntry};
pub use slice::SliceHit;

use limits::{COL_ROW_ID, DATASET_MAX, GROUP_MAX};
use rcache::{RangeCache, scan_chunk};
use slice::SliceBest;
use tracing::{debug, warn};

/// Owner of all datasets, the range cache, and the group table.
#[derive(Debug)]
pub struct DataStore {
    datasets: Box<[Option<Dataset>]>,
    rcache: RangeCache,
    groups: Box<[Option<Group>]>,
    /// Column→group assignment per dataset; index 0 is the row-id column.
    maps: Box<[Box<[Option<usize>]>]>,
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore {
    pub fn new() -> Self {
        Self {
            datasets: (0..DATASET_MAX).map(|_| None).collect(),
            rcache: RangeCache::new(),
            groups: (0..GROUP_MAX).map(|_| None).collect(),
            maps: (0..DATASET_MAX)
                .map(|_| Vec::new().into_boxed_slice())
                .collect(),
        }
    }

    /// Allocate dataset `d`. Replaces any previous dataset in the slot.
    pub fn alloc(&mut self, d: usize, column_n: usize, length: usize, compress: bool) -> bool {
        if d >= DATASET_MAX {
            warn!(target: "store", d, "dataset handle out of range");
            return false;
        }
        let Some(ds) = Dataset::alloc(column_n, length, compress) else {
            return false;
        };
        // Row-id column plus data columns plus derive fields.
        self.maps[d] = (0..1 + ds.row_width()).map(|_| None).collect();
        self.datasets[d] = Some(ds);
        self.rcache.drop_dataset(d);
        true
    }

    pub fn dataset(&self, d: usize) -> Option<&Dataset> {
        self.datasets.get(d)?.as_ref()
    }

    pub fn dataset_mut(&mut self, d: usize) -> Option<&mut Dataset> {
        self.datasets.get_mut(d)?.as_mut()
    }

    /// Distinct mutable borrows of two datasets (resample reads one while
    /// writing the other). `None` when `a == b` or either is absent.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut Dataset, &mut Dataset)> {
        if a == b || a >= DATASET_MAX || b >= DATASET_MAX {
            return None;
        }
        let (lo, hi) = (a.min(b), a.max(b));
        let (left, right) = self.datasets.split_at_mut(hi);
        let first = left[lo].as_mut()?;
        let second = right[0].as_mut()?;
        if a < b {
            Some((first, second))
        } else {
            Some((second, first))
        }
    }

    /// Append one row to dataset `d`; the affected chunk's range entries are
    /// invalidated once per write streak. Returns false when the row was
    /// dropped (bad handle, arity mismatch, chunk failure).
    pub fn insert(&mut self, d: usize, row: &[f64]) -> bool {
        let Some(ds) = self.datasets.get_mut(d).and_then(Option::as_mut) else {
            warn!(target: "store", d, "insert into unknown dataset");
            return false;
        };
        let Some(info) = ds.insert_row(row) else {
            return false;
        };
        if ds.last_wipe != Some(info.chunk) {
            ds.last_wipe = Some(info.chunk);
            self.rcache.invalidate_chunk(d, info.chunk);
        }
        true
    }

    /// Read the row under `cur` in dataset `d` and advance the cursor.
    pub fn read_row(&mut self, d: usize, cur: &mut RowCursor) -> Option<&[f64]> {
        self.datasets.get_mut(d)?.as_mut()?.read(cur)
    }

    /// Writable row access; wipes the chunk's range entries once per streak.
    pub fn write_row(&mut self, d: usize, cur: &mut RowCursor) -> Option<&mut [f64]> {
        let ds = self.datasets.get_mut(d)?.as_mut()?;
        if cur.done() {
            return None;
        }
        let chunk = ds.chunk_of_index(cur.index());
        if ds.last_wipe != Some(chunk) {
            ds.last_wipe = Some(chunk);
            self.rcache.invalidate_chunk(d, chunk);
        }
        ds.write(cur)
    }

    /// Empty dataset `d` and drop its range entries.
    pub fn clean(&mut self, d: usize) {
        if let Some(ds) = self.datasets.get_mut(d).and_then(Option::as_mut) {
            ds.clean();
            self.rcache.drop_dataset(d);
            debug!(target: "store", d, "dataset cleaned");
        }
    }

    /// Resize dataset `d` (rows reset, cursors invalidated).
    pub fn resize(&mut self, d: usize, length: usize) -> bool {
        let Some(ds) = self.datasets.get_mut(d).and_then(Option::as_mut) else {
            warn!(target: "store", d, "resize of unknown dataset");
            return false;
        };
        if !ds.resize(length) {
            return false;
        }
        self.rcache.drop_dataset(d);
        true
    }

    /// Release range entries for a freed derive column and beyond.
    pub fn release_derived_ranges(&mut self, d: usize, col: usize) {
        self.rcache.drop_columns_from(d, col);
    }

    /// Ensure the range entry for `(d, c)` exists with every chunk computed
    /// (the tail chunk is always rescanned) and the aggregate current.
    /// Synthetic columns need no entry. Returns false on a bad handle.
    pub fn ensure_range(&mut self, d: usize, c: i32) -> bool {
        if c == COL_ROW_ID {
            return self.dataset(d).is_some();
        }
        let col = c as usize;
        let Some(ds) = self.datasets.get_mut(d).and_then(Option::as_mut) else {
            warn!(target: "store.rcache", d, "range fetch on unknown dataset");
            return false;
        };
        if c < 0 || col >= ds.row_width() {
            warn!(target: "store.rcache", d, c, "range fetch column out of range");
            return false;
        }
        let chunk_n = ds.chunk_n();
        let tail_chunk = ds.tail_chunk();
        let i = self.rcache.take(d, col, chunk_n);
        let entry = self.rcache.entry_mut(i).expect("just allocated");
        if entry.chunk_n() != chunk_n {
            entry.reset(chunk_n);
        }
        let mut recomputed = false;
        for k in 0..chunk_n {
            if !entry.chunk(k).computed || k == tail_chunk {
                *entry.chunk_mut(k) = scan_chunk(ds, col, k);
                recomputed = true;
            }
        }
        if recomputed || !entry.cached {
            entry.aggregate();
        }
        // End of the write streak: the next write must invalidate again.
        ds.last_wipe = None;
        true
    }

    /// Range entry for `(d, c)` without recomputation. See [`ensure_range`].
    ///
    /// [`ensure_range`]: Self::ensure_range
    pub fn range_entry(&self, d: usize, c: i32) -> Option<&RangeEntry> {
        if c < 0 {
            return None;
        }
        let i = self.rcache.find(d, c as usize)?;
        self.rcache.entry(i)
    }

    /// Chunk bounds for `(d, c, k)`; synthetic row-id bounds are computed
    /// directly from the chunk's valid span.
    pub fn chunk_range(&self, d: usize, c: i32, k: usize) -> Option<ChunkRange> {
        if c == COL_ROW_ID {
            let ds = self.dataset(d)?;
            let mut ids = ds
                .chunk_valid_spans(k)
                .into_iter()
                .flatten()
                .map(|(a, b)| (ds.id_of_index(a), ds.id_of_index(b - 1)));
            let (mut lo, mut hi) = ids.next()?;
            for (a, b) in ids {
                lo = lo.min(a);
                hi = hi.max(b);
            }
            return Some(ChunkRange {
                computed: true,
                finite: true,
                fmin: lo as f64,
                fmax: hi as f64,
            });
        }
        Some(self.range_entry(d, c)?.chunk(k))
    }

    /// Aggregate finite `[min, max]` of column `c`, fetching as needed.
    /// `None` when the column has no finite values.
    pub fn column_range(&mut self, d: usize, c: i32) -> Option<(f64, f64)> {
        if !self.ensure_range(d, c) {
            return None;
        }
        if c == COL_ROW_ID {
            let ds = self.dataset(d)?;
            if ds.is_empty() {
                return None;
            }
            return Some((ds.head_id() as f64, (ds.tail_id() - 1) as f64));
        }
        let e = self.range_entry(d, c)?;
        e.finite.then_some((e.fmin, e.fmax))
    }

    /// Row whose value at column `c` is nearest `v`. See module docs of
    /// [`slice`] for the chunk-walk strategy.
    pub fn slice_get(&mut self, d: usize, c: i32, v: f64) -> Option<SliceHit> {
        let ds = self.dataset(d)?;
        if ds.is_empty() || !v.is_finite() {
            return None;
        }
        if c == COL_ROW_ID {
            let id = (v.round().max(0.0) as u64).clamp(ds.head_id(), ds.tail_id() - 1);
            return Some(SliceHit {
                id,
                value: id as f64,
            });
        }
        if !self.ensure_range(d, c) {
            return None;
        }
        let ds = self.dataset(d)?;
        let chunk_n = ds.chunk_n();
        let head_chunk = ds.chunk_of_index(ds.cursor().index());
        let mut best = SliceBest::default();
        let mut scanned = 0usize;
        let mut nearest: Option<(f64, usize)> = None;
        let mut to_scan = Vec::new();
        for step in 0..chunk_n {
            let k = (head_chunk + step) % chunk_n;
            let Some(r) = self.chunk_range(d, c, k) else {
                continue;
            };
            if !r.finite {
                continue;
            }
            if r.fmin <= v && v <= r.fmax {
                if scanned < slice::scan_budget() {
                    to_scan.push(k);
                    scanned += 1;
                }
            } else {
                let dist = (r.fmin - v).max(v - r.fmax);
                if nearest.is_none_or(|(d0, _)| dist < d0) {
                    nearest = Some((dist, k));
                }
            }
        }
        if to_scan.is_empty() {
            to_scan.extend(nearest.map(|(_, k)| k));
        }
        let ds = self.dataset_mut(d)?;
        for k in to_scan {
            ds.for_each_in_chunk(k, |id, row| best.offer(v, id, row, c));
        }
        best.into_hit()
    }

    /// Copy of the full row (data plus derive fields) at logical id `id`.
    pub fn row_at(&mut self, d: usize, id: u64) -> Option<Box<[f64]>> {
        let ds = self.datasets.get_mut(d)?.as_mut()?;
        if id < ds.head_id() || id >= ds.tail_id() {
            return None;
        }
        let mut cur = ds.cursor_at(id);
        ds.read(&mut cur).map(Box::from)
    }

    // Group table ---------------------------------------------------------

    /// Define (or redefine) group `g`.
    pub fn group_set(&mut self, g: usize, group: Group) -> bool {
        if g >= GROUP_MAX {
            warn!(target: "store", g, "group handle out of range");
            return false;
        }
        self.groups[g] = Some(group);
        true
    }

    pub fn group(&self, g: usize) -> Option<&Group> {
        self.groups.get(g)?.as_ref()
    }

    /// Assign column `c` of dataset `d` to group `g` (`None` unassigns).
    /// Column −1 (the row-id column) is assignable like any other.
    pub fn map_column(&mut self, d: usize, c: i32, g: Option<usize>) -> bool {
        let Some(ds) = self.dataset(d) else {
            warn!(target: "store", d, "column map on unknown dataset");
            return false;
        };
        if c < COL_ROW_ID || c >= ds.row_width() as i32 {
            warn!(target: "store", d, c, "column map out of range");
            return false;
        }
        if let Some(g) = g
            && (g >= GROUP_MAX || self.groups[g].is_none())
        {
            warn!(target: "store", d, c, g, "column map to undefined group");
            return false;
        }
        self.maps[d][(c + 1) as usize] = g;
        true
    }

    /// Group assigned to column `c` of dataset `d`, if any.
    pub fn column_group(&self, d: usize, c: i32) -> Option<&Group> {
        let slot = *self.maps.get(d)?.get((c + 1) as usize)?;
        self.group(slot?)
    }
}

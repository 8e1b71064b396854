//! Per-column chunk range cache.
//!
//! One entry per `(dataset, column)` pair, allocated from a fixed rotating
//! pool of [`RCACHE_SLOTS`]. An entry carries a finite min/max per chunk plus
//! an aggregate over the whole column. Entries are valid only while their
//! chunk has not been written: the store clears the `computed` bit (and the
//! aggregate `cached` bit) on the first write of a streak, and a fetch
//! recomputes stale chunks, always rescanning the chunk that holds the tail.
//!
//! A chunk with no finite values keeps `finite = false`; its bounds are
//! meaningless and consumers must fall back to a direct scan.

use crate::data::Dataset;
use crate::limits::RCACHE_SLOTS;
use tracing::trace;

/// Finite bounds of one chunk of one column.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRange {
    pub computed: bool,
    pub finite: bool,
    pub fmin: f64,
    pub fmax: f64,
}

/// Cached bounds for one `(dataset, column)` pair.
#[derive(Debug)]
pub struct RangeEntry {
    pub(crate) dataset: usize,
    pub(crate) column: usize,
    chunks: Box<[ChunkRange]>,
    /// Aggregate over all finite chunks; meaningful while `finite`.
    pub fmin: f64,
    pub fmax: f64,
    pub finite: bool,
    /// Aggregate is current (no writes since the last fetch).
    pub cached: bool,
}

impl RangeEntry {
    fn new(dataset: usize, column: usize, chunk_n: usize) -> Self {
        Self {
            dataset,
            column,
            chunks: vec![ChunkRange::default(); chunk_n].into_boxed_slice(),
            fmin: 0.0,
            fmax: 0.0,
            finite: false,
            cached: false,
        }
    }

    pub fn chunk(&self, k: usize) -> ChunkRange {
        self.chunks.get(k).copied().unwrap_or_default()
    }

    pub fn chunk_n(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn reset(&mut self, chunk_n: usize) {
        self.chunks = vec![ChunkRange::default(); chunk_n].into_boxed_slice();
        self.cached = false;
        self.finite = false;
    }

    pub(crate) fn chunk_mut(&mut self, k: usize) -> &mut ChunkRange {
        &mut self.chunks[k]
    }

    /// Recompute the aggregate from the per-chunk bounds.
    pub(crate) fn aggregate(&mut self) {
        let mut fmin = f64::INFINITY;
        let mut fmax = f64::NEG_INFINITY;
        let mut finite = false;
        for c in self.chunks.iter().filter(|c| c.finite) {
            fmin = fmin.min(c.fmin);
            fmax = fmax.max(c.fmax);
            finite = true;
        }
        self.fmin = fmin;
        self.fmax = fmax;
        self.finite = finite;
        self.cached = true;
    }
}

/// Rotating pool of range entries.
#[derive(Debug)]
pub(crate) struct RangeCache {
    entries: Vec<Option<RangeEntry>>,
    rotate: usize,
}

impl RangeCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: (0..RCACHE_SLOTS).map(|_| None).collect(),
            rotate: 0,
        }
    }

    pub(crate) fn find(&self, dataset: usize, column: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| matches!(e, Some(e) if e.dataset == dataset && e.column == column))
    }

    /// Entry index for `(dataset, column)`, reusing a hit or recycling the
    /// next rotation victim.
    pub(crate) fn take(&mut self, dataset: usize, column: usize, chunk_n: usize) -> usize {
        if let Some(i) = self.find(dataset, column) {
            return i;
        }
        let i = self.rotate;
        self.rotate = (self.rotate + 1) % self.entries.len();
        trace!(target: "store.rcache", dataset, column, slot = i, "range entry allocated");
        self.entries[i] = Some(RangeEntry::new(dataset, column, chunk_n));
        i
    }

    pub(crate) fn entry(&self, i: usize) -> Option<&RangeEntry> {
        self.entries.get(i)?.as_ref()
    }

    pub(crate) fn entry_mut(&mut self, i: usize) -> Option<&mut RangeEntry> {
        self.entries.get_mut(i)?.as_mut()
    }

    /// Clear the `computed` bit of chunk `k` (and the aggregate) for every
    /// entry of `dataset`.
    pub(crate) fn invalidate_chunk(&mut self, dataset: usize, k: usize) {
        for e in self.entries.iter_mut().flatten() {
            if e.dataset == dataset {
                if let Some(c) = e.chunks.get_mut(k) {
                    c.computed = false;
                }
                e.cached = false;
            }
        }
    }

    /// Drop every entry of `dataset` (clean, resize).
    pub(crate) fn drop_dataset(&mut self, dataset: usize) {
        for e in &mut self.entries {
            if matches!(e, Some(e) if e.dataset == dataset) {
                *e = None;
            }
        }
    }

    /// Drop entries of `dataset` whose column index is `col` or beyond;
    /// used when a derive slot is freed and its owned column goes stale.
    pub(crate) fn drop_columns_from(&mut self, dataset: usize, col: usize) {
        for e in &mut self.entries {
            if matches!(e, Some(e) if e.dataset == dataset && e.column >= col) {
                *e = None;
            }
        }
    }
}

/// Scan the valid rows of chunk `k` for column `col` and produce its bounds.
pub(crate) fn scan_chunk(ds: &mut Dataset, col: usize, k: usize) -> ChunkRange {
    let mut r = ChunkRange {
        computed: true,
        finite: false,
        fmin: f64::INFINITY,
        fmax: f64::NEG_INFINITY,
    };
    ds.for_each_in_chunk(k, |_, row| {
        let v = row[col];
        if v.is_finite() {
            r.fmin = r.fmin.min(v);
            r.fmax = r.fmax.max(v);
            r.finite = true;
        }
    });
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_recycles_slots() {
        let mut rc = RangeCache::new();
        for c in 0..RCACHE_SLOTS + 1 {
            rc.take(0, c, 4);
        }
        // Column 0's slot was recycled for the overflow entry.
        assert!(rc.find(0, 0).is_none());
        assert!(rc.find(0, RCACHE_SLOTS).is_some());
    }

    #[test]
    fn invalidate_clears_computed_and_cached() {
        let mut rc = RangeCache::new();
        let i = rc.take(1, 2, 4);
        {
            let e = rc.entry_mut(i).unwrap();
            for k in 0..4 {
                let c = e.chunk_mut(k);
                c.computed = true;
                c.finite = true;
            }
            e.aggregate();
        }
        rc.invalidate_chunk(1, 2);
        let e = rc.entry(i).unwrap();
        assert!(!e.chunk(2).computed);
        assert!(e.chunk(1).computed);
        assert!(!e.cached);
    }

    #[test]
    fn aggregate_skips_non_finite_chunks() {
        let mut e = RangeEntry::new(0, 0, 3);
        *e.chunk_mut(0) = ChunkRange {
            computed: true,
            finite: true,
            fmin: -1.0,
            fmax: 2.0,
        };
        *e.chunk_mut(1) = ChunkRange {
            computed: true,
            finite: false,
            fmin: 0.0,
            fmax: 0.0,
        };
        *e.chunk_mut(2) = ChunkRange {
            computed: true,
            finite: true,
            fmin: 5.0,
            fmax: 7.0,
        };
        e.aggregate();
        assert!(e.finite);
        assert_eq!((e.fmin, e.fmax), (-1.0, 7.0));
    }
}

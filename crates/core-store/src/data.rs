//! Dataset: a ring buffer of rows over fixed-geometry chunks.
//!
//! Geometry is chosen once at allocation: `rows_per_chunk` is the smallest
//! power of two whose decompressed span meets [`CHUNK_TARGET_BYTES`], and the
//! requested capacity is rounded up to whole chunks. Every row carries the
//! declared columns plus [`DERIVE_SLOT_MAX`] derive fields (NaN until a derive
//! slot fills them).
//!
//! Ring invariants:
//! - the row at ring index `r` has logical id `id + ((r - head) mod length)`;
//! - exactly `count` rows are valid, `tail = (head + count) mod length`;
//! - on overflow the oldest row is evicted (`head` advances, `id` increments)
//!   and the derive watermark is clamped so it never trails the head.
//!
//! `tail == head` is ambiguous in index space (empty vs full wrap); `count`
//! disambiguates, and cursors carry their own remaining-row budget so
//! iteration never confuses the two.

use crate::chunk::{ChunkCache, ChunkSlot};
use crate::limits::{CHUNK_SLOT_MAX, CHUNK_TARGET_BYTES, COLUMN_MAX, DERIVE_SLOT_MAX};
use tracing::{debug, warn};

/// A read/write position inside a dataset ring.
///
/// Cursors are plain values; any mutation that resets the ring (clean,
/// resize) or evicts rows past the cursor makes it stale, which readers
/// detect by comparing `id` against the live `[head_id, tail_id)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCursor {
    pub(crate) idx: usize,
    /// Logical id of the row this cursor points at.
    pub id: u64,
    pub(crate) remaining: usize,
}

impl RowCursor {
    pub fn done(&self) -> bool {
        self.remaining == 0
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Ring index of the row the cursor points at. Meaningful only while the
    /// cursor is not done.
    pub fn index(&self) -> usize {
        self.idx
    }

    fn advance(&mut self, length: usize) {
        self.idx = (self.idx + 1) % length;
        self.id += 1;
        self.remaining -= 1;
    }
}

/// Outcome of a successful row insert, for cache invalidation by the owner.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InsertInfo {
    /// Chunk that received the new row. Eviction needs no extra wipe: when
    /// the ring is full the evicted head lives in this same chunk.
    pub chunk: usize,
}

#[derive(Debug)]
pub struct Dataset {
    column_n: usize,
    row_width: usize,
    chunk_shift: u32,
    chunk_mask: usize,
    length: usize,
    chunk_n: usize,
    head: usize,
    count: usize,
    id: u64,
    /// Derive watermark: logical id of the first row unbounded derive slots
    /// have not been applied to.
    applied: u64,
    chunks: Box<[ChunkSlot]>,
    cache: Option<ChunkCache>,
    /// Chunk whose range-cache entry was wiped by the current write streak.
    /// Cleared by a range fetch so the next write invalidates again.
    pub(crate) last_wipe: Option<usize>,
}

impl Dataset {
    /// Allocate a dataset with `column_n` declared columns and room for at
    /// least `length` rows. Returns `None` (logged) when the request is out
    /// of bounds.
    pub fn alloc(column_n: usize, length: usize, compress: bool) -> Option<Self> {
        if column_n == 0 || column_n > COLUMN_MAX || length == 0 {
            warn!(target: "store", column_n, length, "dataset geometry out of bounds");
            return None;
        }
        let row_width = column_n + DERIVE_SLOT_MAX;
        let row_bytes = row_width * std::mem::size_of::<f64>();
        let mut chunk_shift = 0u32;
        while (1usize << chunk_shift) * row_bytes < CHUNK_TARGET_BYTES {
            chunk_shift += 1;
        }
        let rows_per_chunk = 1usize << chunk_shift;
        let chunk_n = length.div_ceil(rows_per_chunk);
        if chunk_n > CHUNK_SLOT_MAX {
            warn!(target: "store", length, chunk_n, "dataset exceeds chunk slot bound");
            return None;
        }
        let length = chunk_n * rows_per_chunk;
        let chunks = (0..chunk_n).map(|_| ChunkSlot::Empty).collect();
        debug!(
            target: "store",
            column_n,
            length,
            rows_per_chunk,
            chunk_n,
            compress,
            "dataset allocated"
        );
        Some(Self {
            column_n,
            row_width,
            chunk_shift,
            chunk_mask: rows_per_chunk - 1,
            length,
            chunk_n,
            head: 0,
            count: 0,
            id: 0,
            applied: 0,
            chunks,
            cache: compress.then(|| ChunkCache::new(rows_per_chunk * row_width)),
            last_wipe: None,
        })
    }

    pub fn column_n(&self) -> usize {
        self.column_n
    }

    /// Declared columns plus derive fields; the stride of one row.
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.length
    }

    pub fn chunk_n(&self) -> usize {
        self.chunk_n
    }

    pub fn chunk_shift(&self) -> u32 {
        self.chunk_shift
    }

    pub fn rows_per_chunk(&self) -> usize {
        self.chunk_mask + 1
    }

    pub fn is_compressed(&self) -> bool {
        self.cache.is_some()
    }

    /// Logical id of the oldest valid row.
    pub fn head_id(&self) -> u64 {
        self.id
    }

    /// Logical id one past the newest valid row.
    pub fn tail_id(&self) -> u64 {
        self.id + self.count as u64
    }

    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Move the derive watermark; clamped into `[head_id, tail_id]`.
    pub fn set_applied(&mut self, id: u64) {
        self.applied = id.clamp(self.id, self.tail_id());
    }

    fn tail_index(&self) -> usize {
        (self.head + self.count) % self.length
    }

    pub(crate) fn tail_chunk(&self) -> usize {
        self.tail_index() >> self.chunk_shift
    }

    pub fn chunk_of_index(&self, idx: usize) -> usize {
        idx >> self.chunk_shift
    }

    /// Logical id of the row at ring index `idx`.
    pub fn id_of_index(&self, idx: usize) -> u64 {
        self.id + ((idx + self.length - self.head) % self.length) as u64
    }

    /// Cursor over the whole valid span, oldest row first.
    pub fn cursor(&self) -> RowCursor {
        RowCursor {
            idx: self.head,
            id: self.id,
            remaining: self.count,
        }
    }

    /// Cursor starting at logical id `id`, clamped into the valid span.
    pub fn cursor_at(&self, id: u64) -> RowCursor {
        let id = id.clamp(self.id, self.tail_id());
        let offset = (id - self.id) as usize;
        RowCursor {
            idx: (self.head + offset) % self.length,
            id,
            remaining: self.count - offset,
        }
    }

    /// Advance `cur` by up to `n` rows.
    pub fn skip(&self, cur: &mut RowCursor, n: usize) {
        let n = n.min(cur.remaining);
        cur.idx = (cur.idx + n) % self.length;
        cur.id += n as u64;
        cur.remaining -= n;
    }

    /// Read the row under `cur` and advance. `None` at the tail or when the
    /// chunk cannot be produced.
    pub fn read(&mut self, cur: &mut RowCursor) -> Option<&[f64]> {
        if cur.remaining == 0 {
            return None;
        }
        let k = cur.idx >> self.chunk_shift;
        let at = (cur.idx & self.chunk_mask) * self.row_width;
        cur.advance(self.length);
        let width = self.row_width;
        let buf = self.chunk_values(k)?;
        Some(&buf[at..at + width])
    }

    /// Like [`read`](Self::read) but yields a writable row and marks the
    /// chunk dirty. Range-cache invalidation is the owner's job (the store
    /// wipes the entry once per chunk per write streak).
    pub fn write(&mut self, cur: &mut RowCursor) -> Option<&mut [f64]> {
        if cur.remaining == 0 {
            return None;
        }
        let k = cur.idx >> self.chunk_shift;
        let at = (cur.idx & self.chunk_mask) * self.row_width;
        cur.advance(self.length);
        let width = self.row_width;
        let buf = self.chunk_values_mut(k)?;
        Some(&mut buf[at..at + width])
    }

    pub(crate) fn insert_row(&mut self, row: &[f64]) -> Option<InsertInfo> {
        if row.len() != self.column_n {
            warn!(
                target: "store",
                got = row.len(),
                want = self.column_n,
                "insert arity mismatch, row dropped"
            );
            return None;
        }
        let tail = self.tail_index();
        let k = tail >> self.chunk_shift;
        let at = (tail & self.chunk_mask) * self.row_width;
        let (column_n, width) = (self.column_n, self.row_width);
        {
            // Chunk production failure drops the row without touching cursors.
            let buf = self.chunk_values_mut(k)?;
            buf[at..at + column_n].copy_from_slice(row);
            for v in &mut buf[at + column_n..at + width] {
                *v = f64::NAN;
            }
        }
        if self.count == self.length {
            self.head = (self.head + 1) % self.length;
            self.id += 1;
            if self.applied < self.id {
                self.applied = self.id;
            }
        } else {
            self.count += 1;
        }
        Some(InsertInfo { chunk: k })
    }

    /// Empty the ring and forget all chunk contents. Ids restart at zero.
    pub fn clean(&mut self) {
        self.head = 0;
        self.count = 0;
        self.id = 0;
        self.applied = 0;
        self.last_wipe = None;
        for c in self.chunks.iter_mut() {
            *c = ChunkSlot::Empty;
        }
        if let Some(cache) = &mut self.cache {
            cache.reset();
        }
    }

    /// Change capacity. Existing rows are discarded and all cursors reset;
    /// compacting across a geometry change is deliberately not attempted.
    /// Logical ids keep counting from where they were.
    pub fn resize(&mut self, length: usize) -> bool {
        if length == 0 {
            warn!(target: "store", "resize to zero rejected");
            return false;
        }
        let rows_per_chunk = self.chunk_mask + 1;
        let chunk_n = length.div_ceil(rows_per_chunk);
        if chunk_n > CHUNK_SLOT_MAX {
            warn!(target: "store", length, chunk_n, "resize exceeds chunk slot bound");
            return false;
        }
        debug!(target: "store", old = self.length, new = chunk_n * rows_per_chunk, "resize resets cursors");
        self.length = chunk_n * rows_per_chunk;
        self.chunk_n = chunk_n;
        self.chunks = (0..chunk_n).map(|_| ChunkSlot::Empty).collect();
        self.head = 0;
        self.count = 0;
        self.applied = self.id;
        self.last_wipe = None;
        if let Some(cache) = &mut self.cache {
            cache.reset();
        }
        true
    }

    /// Valid-row ring-index spans intersecting chunk `k`: zero, one or two
    /// half-open ranges (two when the invalid hole sits inside the chunk's
    /// wrapped arc).
    pub fn chunk_valid_spans(&self, k: usize) -> [Option<(usize, usize)>; 2] {
        let lo = k << self.chunk_shift;
        let hi = (lo + self.rows_per_chunk()).min(self.length);
        if self.count == 0 {
            return [None, None];
        }
        let clip = |a: usize, b: usize| {
            let (a, b) = (a.max(lo), b.min(hi));
            (a < b).then_some((a, b))
        };
        if self.head + self.count <= self.length {
            [clip(self.head, self.head + self.count), None]
        } else {
            let wrap = self.head + self.count - self.length;
            [clip(self.head, self.length), clip(0, wrap)]
        }
    }

    /// Run `f(id, row)` over every valid row of chunk `k`, oldest first
    /// within each span. Returns false when the chunk cannot be produced.
    pub fn for_each_in_chunk(&mut self, k: usize, mut f: impl FnMut(u64, &[f64])) -> bool {
        let spans = self.chunk_valid_spans(k);
        let (mask, width) = (self.chunk_mask, self.row_width);
        let (head, length, id) = (self.head, self.length, self.id);
        let Some(buf) = self.chunk_values(k) else {
            return false;
        };
        for (a, b) in spans.iter().flatten() {
            for idx in *a..*b {
                let row_id = id + ((idx + length - head) % length) as u64;
                let at = (idx & mask) * width;
                f(row_id, &buf[at..at + width]);
            }
        }
        true
    }

    fn chunk_values(&mut self, k: usize) -> Option<&[f64]> {
        if k >= self.chunk_n {
            return None;
        }
        let tail_chunk = ((self.head + self.count) % self.length) >> self.chunk_shift;
        if self.cache.is_some() {
            let cache = self.cache.as_mut().unwrap();
            let slot = cache.load(&mut self.chunks, k, tail_chunk)?;
            return Some(cache.buf(slot));
        }
        self.materialize_live(k);
        match &self.chunks[k] {
            ChunkSlot::Live(buf) => Some(buf),
            _ => None,
        }
    }

    fn chunk_values_mut(&mut self, k: usize) -> Option<&mut [f64]> {
        if k >= self.chunk_n {
            return None;
        }
        let tail_chunk = ((self.head + self.count) % self.length) >> self.chunk_shift;
        if self.cache.is_some() {
            let cache = self.cache.as_mut().unwrap();
            let slot = cache.load(&mut self.chunks, k, tail_chunk)?;
            cache.mark_dirty(slot);
            return Some(cache.buf_mut(slot));
        }
        self.materialize_live(k);
        match &mut self.chunks[k] {
            ChunkSlot::Live(buf) => Some(buf),
            _ => None,
        }
    }

    fn materialize_live(&mut self, k: usize) {
        if matches!(self.chunks[k], ChunkSlot::Empty) {
            let values = self.rows_per_chunk() * self.row_width;
            self.chunks[k] = ChunkSlot::Live(vec![0.0; values].into_boxed_slice());
        }
    }
}

/// Value of public column `col` for a row: the logical id for the synthetic
/// row-id column, the stored field otherwise.
pub fn col_value(row: &[f64], row_id: u64, col: i32) -> f64 {
    if col < 0 {
        row_id as f64
    } else {
        row[col as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds(columns: usize, rows: usize) -> Dataset {
        Dataset::alloc(columns, rows, false).unwrap()
    }

    #[test]
    fn geometry_rounds_to_whole_chunks() {
        let d = ds(2, 100);
        assert_eq!(d.capacity() % d.rows_per_chunk(), 0);
        assert!(d.capacity() >= 100);
        assert!(d.rows_per_chunk() * d.row_width() * 8 >= CHUNK_TARGET_BYTES);
    }

    #[test]
    fn insert_then_read_roundtrip() {
        let mut d = ds(2, 64);
        assert!(d.insert_row(&[1.0, 2.0]).is_some());
        assert!(d.insert_row(&[3.0, 4.0]).is_some());
        let mut cur = d.cursor();
        let first = cur.id;
        let row = d.read(&mut cur).unwrap().to_vec();
        assert_eq!(first, 0);
        assert_eq!(&row[..2], &[1.0, 2.0]);
        assert!(row[2].is_nan(), "derive fields start as NaN");
        let row = d.read(&mut cur).unwrap().to_vec();
        assert_eq!(&row[..2], &[3.0, 4.0]);
        assert!(d.read(&mut cur).is_none());
    }

    #[test]
    fn arity_mismatch_drops_row() {
        let mut d = ds(2, 64);
        assert!(d.insert_row(&[1.0]).is_none());
        assert_eq!(d.len(), 0);
    }

    #[test]
    fn overflow_evicts_and_bumps_id() {
        let mut d = ds(1, 4);
        let cap = d.capacity();
        for i in 0..cap + 3 {
            d.insert_row(&[i as f64]).unwrap();
        }
        assert_eq!(d.len(), cap);
        assert_eq!(d.head_id(), 3);
        assert_eq!(d.tail_id(), cap as u64 + 3);
        let mut cur = d.cursor();
        let row = d.read(&mut cur).unwrap();
        assert_eq!(row[0], 3.0, "oldest surviving value");
    }

    #[test]
    fn watermark_tracks_head_on_overflow() {
        let mut d = ds(1, 4);
        let cap = d.capacity();
        for i in 0..cap {
            d.insert_row(&[i as f64]).unwrap();
        }
        d.set_applied(0);
        d.insert_row(&[99.0]).unwrap();
        assert_eq!(d.applied(), d.head_id());
    }

    #[test]
    fn cursor_at_clamps() {
        let mut d = ds(1, 8);
        for i in 0..5 {
            d.insert_row(&[i as f64]).unwrap();
        }
        let cur = d.cursor_at(100);
        assert!(cur.done());
        let cur = d.cursor_at(2);
        assert_eq!(cur.id, 2);
        assert_eq!(cur.remaining(), 3);
    }

    #[test]
    fn skip_clamps_to_tail() {
        let mut d = ds(1, 8);
        for i in 0..5 {
            d.insert_row(&[i as f64]).unwrap();
        }
        let mut cur = d.cursor();
        d.skip(&mut cur, 3);
        assert_eq!(cur.id, 3);
        d.skip(&mut cur, 10);
        assert!(cur.done());
        assert_eq!(cur.id, d.tail_id());
    }

    #[test]
    fn chunk_spans_cover_exactly_valid_rows() {
        let mut d = ds(1, 8);
        let cap = d.capacity();
        for i in 0..cap + cap / 2 {
            d.insert_row(&[i as f64]).unwrap();
        }
        let mut seen = 0usize;
        for k in 0..d.chunk_n() {
            for (a, b) in d.chunk_valid_spans(k).iter().flatten() {
                seen += b - a;
            }
        }
        assert_eq!(seen, d.len());
    }

    #[test]
    fn compressed_dataset_roundtrips_across_eviction() {
        let mut d = Dataset::alloc(1, 1 << 16, true).unwrap();
        let n = d.rows_per_chunk() * (crate::limits::CHUNK_CACHE_SLOTS + 2);
        for i in 0..n {
            d.insert_row(&[i as f64]).unwrap();
        }
        let mut cur = d.cursor();
        let mut expect = 0.0f64;
        while let Some(row) = d.read(&mut cur) {
            let v = row[0];
            assert_eq!(v, expect);
            expect += 1.0;
        }
        assert_eq!(expect as usize, n);
    }

    #[test]
    fn resize_resets_rows_but_not_id() {
        let mut d = ds(1, 8);
        let cap = d.capacity();
        for i in 0..cap + 2 {
            d.insert_row(&[i as f64]).unwrap();
        }
        let id = d.head_id();
        assert!(d.resize(cap * 2));
        assert_eq!(d.len(), 0);
        assert_eq!(d.head_id(), id);
        assert_eq!(d.applied(), id);
    }

    #[test]
    fn col_value_synthetic_row_id() {
        let row = [5.0, 6.0];
        assert_eq!(col_value(&row, 42, crate::limits::COL_ROW_ID), 42.0);
        assert_eq!(col_value(&row, 42, 1), 6.0);
    }
}

//! Sketches: viewport-clipped data-space geometry, pooled and recycled.
//!
//! A sketch chunk holds up to [`SKETCH_POINTS`] `(x, y)` pairs in *data*
//! coordinates for one figure. Because the stored geometry is data-space,
//! a zoom or pan without a data change replays last frame's sketches under
//! fresh axis transforms instead of re-walking the dataset.
//!
//! Chunks live in a fixed pool threaded through three index-linked lists:
//! `free` (recycled), `current` (being built this frame) and `todraw` (last
//! completed frame, consumed by rasterization). Completing a frame discards
//! `todraw` into `free` and promotes `current`.

use core_model::Drawing;
use core_store::limits::{SKETCH_POINTS, SKETCH_POOL};
use core_surface::ColorIx;

#[derive(Debug)]
pub struct SketchChunk {
    pub figure: usize,
    pub drawing: Drawing,
    pub width: u32,
    pub color: ColorIx,
    points: Box<[(f64, f64)]>,
    pub len: usize,
    next: Option<usize>,
}

impl SketchChunk {
    fn blank() -> Self {
        Self {
            figure: 0,
            drawing: Drawing::Line,
            width: 1,
            color: 0,
            points: vec![(0.0, 0.0); SKETCH_POINTS].into_boxed_slice(),
            len: 0,
            next: None,
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points[..self.len]
    }

    pub fn is_full(&self) -> bool {
        // Line segments append in pairs; keep room for both endpoints.
        self.len + 2 > SKETCH_POINTS
    }

    pub(crate) fn push(&mut self, p: (f64, f64)) {
        debug_assert!(self.len < SKETCH_POINTS, "sketch chunk overflow");
        self.points[self.len] = p;
        self.len += 1;
    }
}

#[derive(Debug)]
pub struct SketchPool {
    chunks: Box<[SketchChunk]>,
    free: Option<usize>,
    current: Option<usize>,
    todraw: Option<usize>,
}

impl Default for SketchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SketchPool {
    pub fn new() -> Self {
        let mut chunks: Box<[SketchChunk]> = (0..SKETCH_POOL).map(|_| SketchChunk::blank()).collect();
        for i in 0..SKETCH_POOL - 1 {
            chunks[i].next = Some(i + 1);
        }
        Self {
            chunks,
            free: Some(0),
            current: None,
            todraw: None,
        }
    }

    pub fn chunk(&self, i: usize) -> &SketchChunk {
        &self.chunks[i]
    }

    pub(crate) fn chunk_mut(&mut self, i: usize) -> &mut SketchChunk {
        &mut self.chunks[i]
    }

    /// Pop a chunk from the free list onto the current list. `None` when the
    /// pool is dry (the caller drops the geometry and reports it).
    pub(crate) fn take(
        &mut self,
        figure: usize,
        drawing: Drawing,
        width: u32,
        color: ColorIx,
    ) -> Option<usize> {
        let i = self.free?;
        self.free = self.chunks[i].next;
        let c = &mut self.chunks[i];
        c.figure = figure;
        c.drawing = drawing;
        c.width = width;
        c.color = color;
        c.len = 0;
        c.next = self.current;
        self.current = Some(i);
        Some(i)
    }

    /// Recycle a whole list into the free list, returning its length.
    fn recycle(&mut self, mut head: Option<usize>) -> usize {
        let mut n = 0;
        while let Some(i) = head {
            head = self.chunks[i].next;
            self.chunks[i].len = 0;
            self.chunks[i].next = self.free;
            self.free = Some(i);
            n += 1;
        }
        n
    }

    /// Frame completed: discard the old `todraw`, promote `current`.
    pub(crate) fn promote(&mut self) {
        let old = self.todraw.take();
        self.recycle(old);
        self.todraw = self.current.take();
    }

    /// Abandon the in-progress frame (restart after a data change).
    pub(crate) fn drop_current(&mut self) {
        let cur = self.current.take();
        self.recycle(cur);
    }

    /// Iterate the completed frame's chunks.
    pub fn todraw(&self) -> SketchIter<'_> {
        SketchIter {
            pool: self,
            at: self.todraw,
        }
    }
}

pub struct SketchIter<'a> {
    pool: &'a SketchPool,
    at: Option<usize>,
}

impl<'a> Iterator for SketchIter<'a> {
    type Item = &'a SketchChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.at?;
        self.at = self.pool.chunks[i].next;
        Some(&self.pool.chunks[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_promote_recycle_cycle() {
        let mut p = SketchPool::new();
        let a = p.take(0, Drawing::Line, 1, 1).unwrap();
        p.chunk_mut(a).push((1.0, 2.0));
        p.promote();
        assert_eq!(p.todraw().count(), 1);
        assert_eq!(p.todraw().next().unwrap().points(), &[(1.0, 2.0)]);
        // Next frame: nothing built, promote discards the old frame.
        p.promote();
        assert_eq!(p.todraw().count(), 0);
    }

    #[test]
    fn pool_exhausts_then_recovers() {
        let mut p = SketchPool::new();
        for _ in 0..SKETCH_POOL {
            assert!(p.take(0, Drawing::Dot, 1, 1).is_some());
        }
        assert!(p.take(0, Drawing::Dot, 1, 1).is_none(), "pool dry");
        p.drop_current();
        assert!(p.take(0, Drawing::Dot, 1, 1).is_some());
    }

    #[test]
    fn full_flag_leaves_room_for_segment_pairs() {
        let mut p = SketchPool::new();
        let a = p.take(0, Drawing::Line, 1, 1).unwrap();
        for i in 0..SKETCH_POINTS - 2 {
            p.chunk_mut(a).push((i as f64, 0.0));
        }
        assert!(!p.chunk(a).is_full());
        p.chunk_mut(a).push((0.0, 0.0));
        assert!(p.chunk(a).is_full());
    }
}

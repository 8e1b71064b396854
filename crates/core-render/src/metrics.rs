//! Draw engine instrumentation.
//!
//! Lightweight always-compiled counters so integration tests outside the
//! crate can assert chunk-skip and yield behavior. Overhead is a handful of
//! relaxed atomic increments per chunk.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Debug, Default)]
pub struct RenderMetrics {
    pub frames: AtomicU64,
    /// Frames that hit the deadline and yielded mid-pass.
    pub yielded_frames: AtomicU64,
    pub chunks_drawn: AtomicU64,
    pub chunks_skipped: AtomicU64,
    pub segments_emitted: AtomicU64,
    pub dots_emitted: AtomicU64,
    pub sketch_chunks_taken: AtomicU64,
    /// Appends dropped because the sketch pool ran dry.
    pub sketch_exhausted: AtomicU64,
    pub last_frame_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderMetricsSnapshot {
    pub frames: u64,
    pub yielded_frames: u64,
    pub chunks_drawn: u64,
    pub chunks_skipped: u64,
    pub segments_emitted: u64,
    pub dots_emitted: u64,
    pub sketch_chunks_taken: u64,
    pub sketch_exhausted: u64,
    pub last_frame_ms: u64,
}

impl RenderMetrics {
    pub fn snapshot(&self) -> RenderMetricsSnapshot {
        RenderMetricsSnapshot {
            frames: self.frames.load(Relaxed),
            yielded_frames: self.yielded_frames.load(Relaxed),
            chunks_drawn: self.chunks_drawn.load(Relaxed),
            chunks_skipped: self.chunks_skipped.load(Relaxed),
            segments_emitted: self.segments_emitted.load(Relaxed),
            dots_emitted: self.dots_emitted.load(Relaxed),
            sketch_chunks_taken: self.sketch_chunks_taken.load(Relaxed),
            sketch_exhausted: self.sketch_exhausted.load(Relaxed),
            last_frame_ms: self.last_frame_ms.load(Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Relaxed);
    }
}

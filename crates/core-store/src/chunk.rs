//! Chunk storage and the decompressed-buffer cache.
//!
//! A dataset's rows live in a fixed array of chunk slots. Without compression
//! a slot owns its decompressed buffer directly and keeps it for the dataset
//! lifetime. With compression a fixed set of [`CHUNK_CACHE_SLOTS`] buffers
//! floats over the slot array: a slot is either resident in one of those
//! buffers or stored in LZ4 block form, never both live at once. The victim
//! rotation skips the chunk containing the write tail so streaming inserts do
//! not thrash the codec.

use crate::limits::CHUNK_CACHE_SLOTS;
use tracing::{error, trace};

/// Where a chunk's row data currently is.
#[derive(Debug, Default)]
pub(crate) enum ChunkSlot {
    /// Never materialized; reads see zeroes once materialized.
    #[default]
    Empty,
    /// Uncompressed resident buffer (compression disabled).
    Live(Box<[f64]>),
    /// Resident in cache buffer `slot` (compression enabled).
    Cached { slot: usize },
    /// LZ4 block with prepended size (compression enabled, not resident).
    Packed(Box<[u8]>),
}

#[derive(Debug)]
struct CacheSlot {
    /// Chunk index currently hosted, if any.
    chunk: Option<usize>,
    /// Written since decompression; must be recompressed on eviction.
    dirty: bool,
    /// Materialized from an empty slot (all zeroes, nothing to pack back).
    fresh: bool,
    buf: Box<[f64]>,
}

/// Rotating pool of decompressed chunk buffers.
#[derive(Debug)]
pub(crate) struct ChunkCache {
    slots: Vec<CacheSlot>,
    rotate: usize,
}

impl ChunkCache {
    pub(crate) fn new(chunk_values: usize) -> Self {
        let slots = (0..CHUNK_CACHE_SLOTS)
            .map(|_| CacheSlot {
                chunk: None,
                dirty: false,
                fresh: false,
                buf: vec![0.0; chunk_values].into_boxed_slice(),
            })
            .collect();
        Self { slots, rotate: 0 }
    }

    /// Drop all residency claims; buffers are retained for reuse.
    pub(crate) fn reset(&mut self) {
        for s in &mut self.slots {
            s.chunk = None;
            s.dirty = false;
        }
        self.rotate = 0;
    }

    pub(crate) fn slot_of(&self, chunk: usize) -> Option<usize> {
        self.slots.iter().position(|s| s.chunk == Some(chunk))
    }

    pub(crate) fn buf(&self, slot: usize) -> &[f64] {
        &self.slots[slot].buf
    }

    pub(crate) fn buf_mut(&mut self, slot: usize) -> &mut [f64] {
        &mut self.slots[slot].buf
    }

    pub(crate) fn mark_dirty(&mut self, slot: usize) {
        self.slots[slot].dirty = true;
    }

    /// Pick the next victim slot, skipping the one hosting `tail_chunk` while
    /// another candidate remains.
    fn pick_victim(&mut self, tail_chunk: usize) -> usize {
        for _ in 0..self.slots.len() {
            let v = self.rotate;
            self.rotate = (self.rotate + 1) % self.slots.len();
            if self.slots[v].chunk != Some(tail_chunk) {
                return v;
            }
        }
        // Every slot hosts the tail chunk (cache of one); evict it anyway.
        let v = self.rotate;
        self.rotate = (self.rotate + 1) % self.slots.len();
        v
    }

    /// Make chunk `k` resident and return its cache slot. `chunks` supplies
    /// the slot array for compress-back of the dirty victim. Returns `None`
    /// only when the packed form of `k` fails to decode.
    pub(crate) fn load(
        &mut self,
        chunks: &mut [ChunkSlot],
        k: usize,
        tail_chunk: usize,
    ) -> Option<usize> {
        if let Some(slot) = self.slot_of(k) {
            return Some(slot);
        }
        let victim = self.pick_victim(tail_chunk);
        if let Some(prev) = self.slots[victim].chunk.take() {
            // The packed form was consumed when `prev` became resident, so a
            // chunk that ever held data must be packed back even when clean.
            if self.slots[victim].dirty || !self.slots[victim].fresh {
                match pack_values(&self.slots[victim].buf) {
                    Some(packed) => chunks[prev] = ChunkSlot::Packed(packed),
                    None => {
                        error!(target: "store.chunk", chunk = prev, "chunk compression failed, dropping packed copy");
                        chunks[prev] = ChunkSlot::Empty;
                    }
                }
            } else {
                // Materialized and never written; it decodes to zeroes again.
                chunks[prev] = ChunkSlot::Empty;
            }
            self.slots[victim].dirty = false;
        }
        match std::mem::take(&mut chunks[k]) {
            ChunkSlot::Packed(bytes) => {
                if !unpack_values(&bytes, &mut self.slots[victim].buf) {
                    error!(target: "store.chunk", chunk = k, "chunk decompression failed");
                    chunks[k] = ChunkSlot::Packed(bytes);
                    return None;
                }
                self.slots[victim].fresh = false;
                trace!(target: "store.chunk", chunk = k, slot = victim, "chunk decompressed");
            }
            ChunkSlot::Empty => {
                // First access materializes a zeroed buffer.
                self.slots[victim].buf.fill(0.0);
                self.slots[victim].fresh = true;
                trace!(target: "store.chunk", chunk = k, slot = victim, "chunk materialized");
            }
            other => {
                // Live/Cached cannot appear here: Live implies compression is
                // off and Cached implies slot_of() hit above.
                debug_assert!(false, "unexpected chunk slot state");
                chunks[k] = other;
                return None;
            }
        }
        chunks[k] = ChunkSlot::Cached { slot: victim };
        self.slots[victim].chunk = Some(k);
        self.slots[victim].dirty = false;
        Some(victim)
    }
}

/// LZ4-compress a value buffer, little-endian, size-prepended.
fn pack_values(values: &[f64]) -> Option<Box<[u8]>> {
    let mut raw = Vec::with_capacity(values.len() * 8);
    for v in values {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    let packed = lz4_flex::compress_prepend_size(&raw);
    Some(packed.into_boxed_slice())
}

/// Decode a packed chunk into `out`. Returns false on codec or size mismatch.
fn unpack_values(bytes: &[u8], out: &mut [f64]) -> bool {
    let raw = match lz4_flex::decompress_size_prepended(bytes) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    if raw.len() != out.len() * 8 {
        return false;
    }
    for (i, chunk) in raw.chunks_exact(8).enumerate() {
        let mut le = [0u8; 8];
        le.copy_from_slice(chunk);
        out[i] = f64::from_le_bytes(le);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip() {
        let values = vec![0.0, 1.5, -2.25, f64::NAN, 1e300];
        let packed = pack_values(&values).unwrap();
        let mut out = vec![0.0f64; values.len()];
        assert!(unpack_values(&packed, &mut out));
        assert_eq!(out[1], 1.5);
        assert!(out[3].is_nan());
        assert_eq!(out[4], 1e300);
    }

    #[test]
    fn unpack_rejects_size_mismatch() {
        let packed = pack_values(&[1.0, 2.0]).unwrap();
        let mut out = vec![0.0f64; 3];
        assert!(!unpack_values(&packed, &mut out));
    }

    #[test]
    fn cache_load_materializes_and_reuses() {
        let mut cache = ChunkCache::new(8);
        let mut chunks: Vec<ChunkSlot> = (0..3).map(|_| ChunkSlot::Empty).collect();
        let a = cache.load(&mut chunks, 0, 0).unwrap();
        cache.buf_mut(a)[0] = 7.0;
        cache.mark_dirty(a);
        let b = cache.load(&mut chunks, 0, 0).unwrap();
        assert_eq!(a, b, "resident chunk must not move");
        assert_eq!(cache.buf(b)[0], 7.0);
    }

    #[test]
    fn dirty_victim_survives_eviction() {
        let mut cache = ChunkCache::new(4);
        let chunk_n = CHUNK_CACHE_SLOTS + 2;
        let mut chunks: Vec<ChunkSlot> = (0..chunk_n).map(|_| ChunkSlot::Empty).collect();
        let s = cache.load(&mut chunks, 0, chunk_n - 1).unwrap();
        cache.buf_mut(s)[1] = 42.0;
        cache.mark_dirty(s);
        // Force chunk 0 out by touching every other chunk.
        for k in 1..chunk_n {
            cache.load(&mut chunks, k, chunk_n - 1).unwrap();
        }
        assert!(cache.slot_of(0).is_none(), "chunk 0 must have been evicted");
        assert!(matches!(chunks[0], ChunkSlot::Packed(_)));
        let s = cache.load(&mut chunks, 0, chunk_n - 1).unwrap();
        assert_eq!(cache.buf(s)[1], 42.0);
    }
}

//! Fixed capacity bounds for every engine pool.
//!
//! All cross-references between datasets, columns, axes, figures, groups and
//! derive slots are small integer indices into arrays sized by these
//! constants. Pools are pre-allocated to these bounds and never demand-grow;
//! allocation failure means "no free slot" and is reported through the log
//! channel, not through structured errors.

/// Maximum number of simultaneously allocated datasets.
pub const DATASET_MAX: usize = 16;

/// Maximum declared column count per dataset (excluding derive slots).
pub const COLUMN_MAX: usize = 16;

/// Number of derived-column slots appended to every dataset row. Slot `s`
/// owns column `column_n + s`.
pub const DERIVE_SLOT_MAX: usize = 8;

/// Maximum number of axes.
pub const AXIS_MAX: usize = 12;

/// Maximum number of figures.
pub const FIGURE_MAX: usize = 24;

/// Maximum number of column groups.
pub const GROUP_MAX: usize = 8;

/// Target decompressed byte size of one chunk. The per-dataset chunk shift is
/// the smallest power of two whose row span meets this target.
pub const CHUNK_TARGET_BYTES: usize = 16 * 1024;

/// Maximum chunk slots per dataset; bounds `length` at allocation time.
pub const CHUNK_SLOT_MAX: usize = 4096;

/// Decompressed chunk buffers floating over a compressed dataset.
pub const CHUNK_CACHE_SLOTS: usize = 16;

/// Range-cache entries shared by all `(dataset, column)` pairs.
pub const RCACHE_SLOTS: usize = 40;

/// Maximum number of value-containing chunks scanned by a slice query.
pub const SLICE_SPAN: usize = 4;

/// Points per sketch chunk.
pub const SKETCH_POINTS: usize = 512;

/// Sketch chunks in the fixed free pool.
pub const SKETCH_POOL: usize = 256;

/// Default progressive-draw frame budget in milliseconds.
pub const FRAME_BUDGET_MS: u64 = 20;

/// Public column index of the synthetic row-id column. Its value at a row is
/// the row's logical id, which survives ring eviction.
pub const COL_ROW_ID: i32 = -1;

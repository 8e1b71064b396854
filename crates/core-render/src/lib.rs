//! Progressive rendering: sketch production, replay, and overlays.
//!
//! Exposed components:
//! - [`engine::DrawEngine`]: the time-budgeted frame loop. Walks figure rows
//!   through the rasterizer's trial predicates, culls whole chunks via the
//!   range cache, and saves per-figure cursors at every yield so a pass
//!   spans as many frames as the data needs.
//! - [`sketch`]: the fixed pool of data-space sketch chunks with the
//!   free / current / todraw list rotation.
//! - [`overlay`]: legend, data box (slice and fit readouts) and sample
//!   marks, repainted every frame on top of the replayed sketches.
//! - [`metrics`]: execution counters (chunk skips, yields, emitted
//!   geometry) with a snapshot for tests and the metrics readout.
//!
//! The engine never blocks and never errors on user-driven misuse: a stale
//! figure or dataset handle ends that figure's pass, pool exhaustion drops
//! geometry and counts it, and everything else follows the log-and-continue
//! contract of the engine.

pub mod engine;
pub mod metrics;
pub mod overlay;
pub mod sketch;

pub use engine::{DrawEngine, SketchStatus};
pub use metrics::{RenderMetrics, RenderMetricsSnapshot};
pub use overlay::{DataBox, DataBoxMode};

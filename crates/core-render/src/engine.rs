//! Progressive draw engine.
//!
//! A frame walks every live figure's rows through the rasterizer's trial
//! predicates and records the surviving geometry as data-space sketches.
//! Work is budgeted: the engine checks a wall-clock deadline between chunk
//! boundaries and yields with per-figure cursors saved, so input events are
//! handled between frames and a long dataset renders across several frames
//! without blocking. Exceeding the deadline is not an error; the next call
//! resumes exactly where the last one stopped.
//!
//! Scheduling: the pass starts hidden figures first (they paint muted,
//! under the visible ones), then always advances the unfinished figure
//! whose cursor lags furthest behind (smallest row id), keeping output
//! balanced across series.
//!
//! Chunk culling: before scanning a chunk, its cached column bounds are
//! transformed to pixel space; chunks entirely outside the viewport (with a
//! 16 px margin) or with no finite value in either column are skipped
//! whole.
//!
//! Per-figure state machine: `Finished → Started (new pass) →
//! Interrupted* → Finished`.

use crate::metrics::RenderMetrics;
use crate::sketch::SketchPool;
use core_model::{Drawing, Figure, PlotModel};
use core_store::limits::{FIGURE_MAX, FRAME_BUDGET_MS, SKETCH_POINTS};
use core_store::{RowCursor, col_value};
use core_surface::{COLOR_MUTED, Clock, ColorIx, PixPoint, Rasterizer, series_color};
use tracing::{trace, warn};

/// Pixel margin around the viewport inside which chunks still draw.
const CULL_MARGIN_PX: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SketchStatus {
    #[default]
    Finished,
    Started,
    Interrupted,
}

#[derive(Debug, Default)]
struct DrawState {
    cursor: Option<RowCursor>,
    /// Last finite point, in data and pixel space.
    last: Option<((f64, f64), (f64, f64))>,
    /// A previous finite point exists (line continuation).
    line: bool,
    status: SketchStatus,
    /// Active sketch chunk receiving this figure's output.
    sketch: Option<usize>,
}

#[derive(Debug)]
pub struct DrawEngine {
    pool: SketchPool,
    draw: Box<[DrawState]>,
    /// Paint order for the current pass: hidden figures first.
    order: Vec<usize>,
    in_progress: bool,
    pub budget_ms: u64,
    metrics: RenderMetrics,
}

impl Default for DrawEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawEngine {
    pub fn new() -> Self {
        Self {
            pool: SketchPool::new(),
            draw: (0..FIGURE_MAX).map(|_| DrawState::default()).collect(),
            order: Vec::new(),
            in_progress: false,
            budget_ms: FRAME_BUDGET_MS,
            metrics: RenderMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &RenderMetrics {
        &self.metrics
    }

    pub fn sketches(&self) -> &SketchPool {
        &self.pool
    }

    /// Abandon the in-progress pass; the next frame restarts from the head.
    /// Call after any mutation that invalidates cursors (clean, resize,
    /// overflow past a draw cursor).
    pub fn invalidate(&mut self) {
        if self.in_progress {
            trace!(target: "render.engine", "pass invalidated");
        }
        self.in_progress = false;
        self.pool.drop_current();
    }

    /// Run one frame against the deadline. Returns true when the pass
    /// completed and the finished sketch list was promoted for drawing.
    pub fn frame(
        &mut self,
        model: &mut PlotModel,
        rast: &mut dyn Rasterizer,
        clock: &dyn Clock,
    ) -> bool {
        let started = clock.now_ms();
        let deadline = started + self.budget_ms;
        if !self.in_progress {
            self.begin(model);
        }
        rast.clear_trial();
        RenderMetrics::incr(&self.metrics.frames);
        loop {
            let Some(f) = self.pick() else {
                self.pool.promote();
                self.in_progress = false;
                self.metrics
                    .last_frame_ms
                    .store(clock.now_ms() - started, std::sync::atomic::Ordering::Relaxed);
                trace!(target: "render.engine", "pass complete");
                return true;
            };
            self.trial_chunk(model, rast, f);
            if clock.now_ms() >= deadline {
                RenderMetrics::incr(&self.metrics.yielded_frames);
                self.metrics
                    .last_frame_ms
                    .store(clock.now_ms() - started, std::sync::atomic::Ordering::Relaxed);
                return false;
            }
        }
    }

    /// Start a new pass: reset per-figure cursors, hidden figures first in
    /// paint order.
    fn begin(&mut self, model: &PlotModel) {
        self.pool.drop_current();
        self.order.clear();
        let figures = model.figures();
        for hidden_pass in [true, false] {
            for (f, fig) in figures.iter().enumerate() {
                if let Some(fig) = fig
                    && fig.hidden == hidden_pass
                {
                    self.order.push(f);
                }
            }
        }
        for st in self.draw.iter_mut() {
            *st = DrawState::default();
        }
        for &f in &self.order {
            let fig = figures[f].as_ref().expect("ordered figure exists");
            let Some(ds) = model.store().dataset(fig.dataset) else {
                continue;
            };
            self.draw[f] = DrawState {
                cursor: Some(ds.cursor()),
                last: None,
                line: false,
                status: SketchStatus::Started,
                sketch: None,
            };
        }
        self.in_progress = true;
        trace!(target: "render.engine", figures = self.order.len(), "pass started");
    }

    /// Unfinished figure with the smallest cursor id (ties keep paint
    /// order).
    fn pick(&self) -> Option<usize> {
        let mut best: Option<(u64, usize)> = None;
        for &f in &self.order {
            let st = &self.draw[f];
            if st.status == SketchStatus::Finished {
                continue;
            }
            let id = st.cursor.map(|c| c.id).unwrap_or(u64::MAX);
            if best.is_none_or(|(bid, _)| id < bid) {
                best = Some((id, f));
            }
        }
        best.map(|(_, f)| f)
    }

    /// Produce one chunk's worth of output for figure `f`, yielding at the
    /// chunk boundary.
    fn trial_chunk(&mut self, model: &mut PlotModel, rast: &mut dyn Rasterizer, f: usize) {
        let Some(fig) = model.figure(f).cloned() else {
            self.draw[f].status = SketchStatus::Finished;
            return;
        };
        let d = fig.dataset;
        let Some(mut cur) = self.draw[f].cursor else {
            self.draw[f].status = SketchStatus::Finished;
            return;
        };
        let Some(ds) = model.store().dataset(d) else {
            self.draw[f].status = SketchStatus::Finished;
            return;
        };
        // Overflow may have evicted rows under the cursor; clamp back in.
        if cur.id < ds.head_id() || cur.id > ds.tail_id() {
            cur = ds.cursor_at(cur.id);
            self.draw[f].line = false;
        }
        if cur.done() {
            self.draw[f].cursor = Some(cur);
            self.draw[f].status = SketchStatus::Finished;
            return;
        }
        let shift = ds.chunk_shift();
        let rows_per_chunk = ds.rows_per_chunk();
        let k = cur.index() >> shift;
        let (sx, ox) = model.composed(fig.axis_x);
        let (sy, oy) = model.composed(fig.axis_y);
        let layout = model.layout().clone();
        let viewport = layout.viewport;
        let color = if fig.hidden {
            COLOR_MUTED
        } else {
            series_color(f)
        };
        let pix = |x: f64, y: f64| {
            PixPoint::new(layout.px_x(x * sx + ox), layout.px_y(y * sy + oy))
        };

        if self.chunk_culled(model, &fig, k, &pix, viewport) {
            // Jump to the first row of the next chunk.
            let next_boundary = (k + 1) * rows_per_chunk;
            let n = next_boundary - cur.index();
            let Some(ds) = model.store().dataset(d) else {
                self.draw[f].status = SketchStatus::Finished;
                return;
            };
            ds.skip(&mut cur, n);
            self.draw[f].line = false;
            self.draw[f].cursor = Some(cur);
            self.draw[f].status = if cur.done() {
                SketchStatus::Finished
            } else {
                SketchStatus::Interrupted
            };
            RenderMetrics::incr(&self.metrics.chunks_skipped);
            return;
        }

        let mut line = self.draw[f].line;
        let mut last = self.draw[f].last;
        let status;
        loop {
            if cur.done() {
                status = SketchStatus::Finished;
                break;
            }
            if cur.index() >> shift != k {
                // Chunk boundary: yield to the scheduler.
                status = SketchStatus::Interrupted;
                break;
            }
            let id = cur.id;
            let row = match model.store_mut().dataset_mut(d).and_then(|ds| ds.read(&mut cur)) {
                Some(row) => (col_value(row, id, fig.col_x), col_value(row, id, fig.col_y)),
                None => {
                    warn!(target: "render.engine", f, d, "row read failed mid-draw");
                    status = SketchStatus::Finished;
                    break;
                }
            };
            let (x, y) = row;
            match fig.drawing {
                Drawing::Line | Drawing::Dash => {
                    if !(x.is_finite() && y.is_finite()) {
                        // Break the polyline at a gap.
                        line = false;
                        continue;
                    }
                    let p = pix(x, y);
                    if line
                        && let Some((last_data, last_px)) = last
                    {
                        let a = PixPoint::new(last_px.0, last_px.1);
                        if rast.trial_line(a, p, color, fig.width as f64) {
                            self.append(f, &fig, color, &[last_data, (x, y)]);
                            RenderMetrics::incr(&self.metrics.segments_emitted);
                        }
                    }
                    last = Some(((x, y), (p.x, p.y)));
                    line = true;
                }
                Drawing::Dot => {
                    if x.is_finite()
                        && y.is_finite()
                        && rast.trial_dot(pix(x, y), fig.width as f64, color)
                    {
                        self.append(f, &fig, color, &[(x, y)]);
                        RenderMetrics::incr(&self.metrics.dots_emitted);
                    }
                }
            }
        }
        RenderMetrics::incr(&self.metrics.chunks_drawn);
        self.draw[f].cursor = Some(cur);
        self.draw[f].line = line;
        self.draw[f].last = last;
        self.draw[f].status = status;
    }

    /// Can chunk `k` be skipped outright for this figure?
    fn chunk_culled(
        &self,
        model: &mut PlotModel,
        fig: &Figure,
        k: usize,
        pix: &impl Fn(f64, f64) -> PixPoint,
        viewport: core_surface::PixRect,
    ) -> bool {
        let d = fig.dataset;
        model.store_mut().ensure_range(d, fig.col_x);
        model.store_mut().ensure_range(d, fig.col_y);
        let rx = model.store().chunk_range(d, fig.col_x, k);
        let ry = model.store().chunk_range(d, fig.col_y, k);
        if let Some(r) = rx.filter(|r| r.computed) {
            if !r.finite {
                return true;
            }
            let a = pix(r.fmin, 0.0).x;
            let b = pix(r.fmax, 0.0).x;
            let (lo, hi) = (a.min(b), a.max(b));
            if hi < viewport.x0 - CULL_MARGIN_PX || lo > viewport.x1 + CULL_MARGIN_PX {
                return true;
            }
        }
        if let Some(r) = ry.filter(|r| r.computed) {
            if !r.finite {
                return true;
            }
            let a = pix(0.0, r.fmin).y;
            let b = pix(0.0, r.fmax).y;
            let (lo, hi) = (a.min(b), a.max(b));
            if hi < viewport.y0 - CULL_MARGIN_PX || lo > viewport.y1 + CULL_MARGIN_PX {
                return true;
            }
        }
        false
    }

    /// Append points to the figure's active sketch chunk, pulling a fresh
    /// chunk from the pool as needed. Pool exhaustion drops the geometry
    /// and is reported once per frame through the metrics.
    fn append(&mut self, f: usize, fig: &Figure, color: ColorIx, pts: &[(f64, f64)]) {
        let need = pts.len();
        let usable = self.draw[f].sketch.is_some_and(|i| {
            let c = self.pool.chunk(i);
            c.figure == f && c.len + need <= SKETCH_POINTS
        });
        if !usable {
            match self.pool.take(f, fig.drawing, fig.width, color) {
                Some(i) => {
                    self.draw[f].sketch = Some(i);
                    RenderMetrics::incr(&self.metrics.sketch_chunks_taken);
                }
                None => {
                    RenderMetrics::incr(&self.metrics.sketch_exhausted);
                    return;
                }
            }
        }
        let i = self.draw[f].sketch.expect("active sketch chunk");
        for p in pts {
            self.pool.chunk_mut(i).push(*p);
        }
    }

    /// Replay the completed frame's sketches through the canvas primitives
    /// under the *current* axis transforms, so zoom and pan reuse last
    /// frame's geometry without re-walking the data.
    pub fn draw_sketches(&self, model: &PlotModel, rast: &mut dyn Rasterizer) {
        let layout = model.layout();
        rast.set_clip(layout.viewport);
        for chunk in self.pool.todraw() {
            let Some(fig) = model.figure(chunk.figure) else {
                continue;
            };
            let (sx, ox) = model.composed(fig.axis_x);
            let (sy, oy) = model.composed(fig.axis_y);
            let pix =
                |p: (f64, f64)| PixPoint::new(layout.px_x(p.0 * sx + ox), layout.px_y(p.1 * sy + oy));
            let width = chunk.width as f64;
            match chunk.drawing {
                Drawing::Line => {
                    for seg in chunk.points().chunks_exact(2) {
                        rast.canvas_line(pix(seg[0]), pix(seg[1]), chunk.color, width);
                    }
                }
                Drawing::Dash => {
                    rast.dash_reset();
                    for seg in chunk.points().chunks_exact(2) {
                        rast.canvas_dash(pix(seg[0]), pix(seg[1]), chunk.color, width);
                    }
                }
                Drawing::Dot => {
                    for p in chunk.points() {
                        rast.canvas_dot(pix(*p), width, chunk.color);
                    }
                }
            }
        }
    }
}

//! Progressive rendering behavior: budget-sliced passes must produce the
//! same sketches as an unbounded pass, and culling must skip out-of-view
//! chunks.

use core_model::{Drawing, PlotModel};
use core_render::DrawEngine;
use core_store::limits::COL_ROW_ID;
use core_surface::{Clock, ColorIx, PixPoint, PixRect, Rasterizer};
use std::cell::Cell;

/// Test clock driven by hand; frozen unless advanced.
struct ManualClock(Cell<u64>);

impl ManualClock {
    fn new() -> Self {
        Self(Cell::new(0))
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Headless rasterizer: trial clips against a fixed rectangle, canvas ops
/// count primitives.
#[derive(Default)]
struct TestRaster {
    clip: PixRect,
    lines: usize,
    dashes: usize,
    dots: usize,
}

impl TestRaster {
    fn with_surface(w: f64, h: f64) -> Self {
        Self {
            clip: PixRect::new(0.0, 0.0, w, h),
            ..Self::default()
        }
    }
}

impl Rasterizer for TestRaster {
    fn clear_trial(&mut self) {}

    fn trial_line(&mut self, a: PixPoint, b: PixPoint, _color: ColorIx, _width: f64) -> bool {
        let (lo_x, hi_x) = (a.x.min(b.x), a.x.max(b.x));
        let (lo_y, hi_y) = (a.y.min(b.y), a.y.max(b.y));
        hi_x >= self.clip.x0 && lo_x < self.clip.x1 && hi_y >= self.clip.y0 && lo_y < self.clip.y1
    }

    fn trial_dot(&mut self, p: PixPoint, _width: f64, _color: ColorIx) -> bool {
        self.clip.contains(p)
    }

    fn dash_reset(&mut self) {}

    fn set_clip(&mut self, _rect: PixRect) {}

    fn canvas_line(&mut self, _a: PixPoint, _b: PixPoint, _color: ColorIx, _width: f64) {
        self.lines += 1;
    }

    fn canvas_dash(&mut self, _a: PixPoint, _b: PixPoint, _color: ColorIx, _width: f64) {
        self.dashes += 1;
    }

    fn canvas_dot(&mut self, _p: PixPoint, _width: f64, _color: ColorIx) {
        self.dots += 1;
    }
}

fn streaming_model(rows: usize) -> PlotModel {
    let mut m = PlotModel::new();
    assert!(m.data_alloc(0, 2, Some(rows)));
    for i in 0..rows {
        let t = i as f64 * 0.01;
        assert!(m.insert(0, &[t, (t * 0.7).sin()]));
    }
    let f_line = m.figure_add(0, 0, 1, "sine").unwrap();
    let f_dots = m.figure_add(0, COL_ROW_ID, 0, "ramp").unwrap();
    m.figure_drawing(f_line, Drawing::Line, 2);
    m.figure_drawing(f_dots, Drawing::Dot, 3);
    m.relayout(800, 600, 10, 40, 16);
    let x = m.focused_x();
    let y = m.focused_y();
    assert!(m.scale_manual(x, 0.0, rows as f64 * 0.01));
    assert!(m.scale_manual(y, -1.5, 1.5));
    m
}

type Dump = Vec<(usize, Drawing, Vec<(f64, f64)>)>;

fn dump(engine: &DrawEngine) -> Dump {
    engine
        .sketches()
        .todraw()
        .map(|c| (c.figure, c.drawing, c.points().to_vec()))
        .collect()
}

/// A zero-budget engine yields every chunk; the final sketch list must be
/// identical to a single unbounded pass over the same data.
#[test]
fn budget_sliced_pass_matches_unbounded_pass() {
    let rows = 20_000;

    let mut model_a = streaming_model(rows);
    let mut rast_a = TestRaster::with_surface(800.0, 600.0);
    let clock_a = ManualClock::new();
    let mut unbounded = DrawEngine::new();
    unbounded.budget_ms = 1_000_000;
    assert!(
        unbounded.frame(&mut model_a, &mut rast_a, &clock_a),
        "unbounded pass completes in one frame"
    );

    let mut model_b = streaming_model(rows);
    let mut rast_b = TestRaster::with_surface(800.0, 600.0);
    let clock_b = ManualClock::new();
    let mut sliced = DrawEngine::new();
    sliced.budget_ms = 0;
    let mut frames = 0;
    while !sliced.frame(&mut model_b, &mut rast_b, &clock_b) {
        frames += 1;
        assert!(frames < 100_000, "pass failed to converge");
    }
    assert!(frames > 1, "zero budget must yield more than once");
    assert!(sliced.metrics().snapshot().yielded_frames > 0);

    assert_eq!(dump(&unbounded), dump(&sliced));
}

/// Sketch replay issues canvas primitives for every stored segment and dot.
#[test]
fn replay_emits_stored_geometry() {
    let mut model = streaming_model(5_000);
    let mut rast = TestRaster::with_surface(800.0, 600.0);
    let clock = ManualClock::new();
    let mut engine = DrawEngine::new();
    engine.budget_ms = 1_000_000;
    assert!(engine.frame(&mut model, &mut rast, &clock));

    let segments: usize = engine
        .sketches()
        .todraw()
        .filter(|c| c.drawing == Drawing::Line)
        .map(|c| c.points().len() / 2)
        .sum();
    let dots: usize = engine
        .sketches()
        .todraw()
        .filter(|c| c.drawing == Drawing::Dot)
        .map(|c| c.points().len())
        .sum();
    assert!(segments > 0 && dots > 0, "both figures produced output");

    engine.draw_sketches(&model, &mut rast);
    assert_eq!(rast.lines, segments);
    assert_eq!(rast.dots, dots);

    // Zoom without a data change: the same sketches replay unchanged.
    let x = model.focused_x();
    assert!(model.scale_zoom(x, 0.5, 2.0));
    let before = rast.lines;
    engine.draw_sketches(&model, &mut rast);
    assert_eq!(rast.lines, before + segments);
}

/// Chunks wholly outside the viewport are skipped via the range cache.
#[test]
fn out_of_view_chunks_are_skipped() {
    let mut model = streaming_model(20_000);
    // Zoom X onto a tiny leading window; nearly every chunk is culled.
    let x = model.focused_x();
    assert!(model.scale_manual(x, 0.0, 1.0));
    let mut rast = TestRaster::with_surface(800.0, 600.0);
    let clock = ManualClock::new();
    let mut engine = DrawEngine::new();
    engine.budget_ms = 1_000_000;
    assert!(engine.frame(&mut model, &mut rast, &clock));
    let m = engine.metrics().snapshot();
    assert!(m.chunks_skipped > 0, "culling never engaged");
    assert!(
        m.chunks_skipped > m.chunks_drawn,
        "most chunks should be culled: {m:?}"
    );
}

/// Invalidation restarts the pass and the engine converges again.
#[test]
fn invalidate_mid_pass_recovers() {
    let mut model = streaming_model(20_000);
    let mut rast = TestRaster::with_surface(800.0, 600.0);
    let clock = ManualClock::new();
    let mut engine = DrawEngine::new();
    engine.budget_ms = 0;
    // A few yielding frames in, mutate the data and invalidate.
    for _ in 0..3 {
        assert!(!engine.frame(&mut model, &mut rast, &clock));
    }
    assert!(model.insert(0, &[1000.0, 0.0]));
    engine.invalidate();
    let mut frames = 0;
    while !engine.frame(&mut model, &mut rast, &clock) {
        frames += 1;
        assert!(frames < 100_000, "pass failed to converge after invalidate");
    }
    assert!(dump(&engine).iter().any(|(_, _, pts)| !pts.is_empty()));
}

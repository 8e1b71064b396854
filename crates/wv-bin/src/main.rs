//! Waveview entrypoint: a headless demo driver for the plotting engine.
//!
//! Streams a synthetic two-channel feed (wrapping clock plus sine) into the
//! store, keeps a difference figure and a polynomial fit alive through the
//! derive pipeline, and renders progressively against the configured frame
//! budget with counting collaborators in place of a windowing frontend. The
//! run summary at the end comes from the engine's metrics snapshots.

mod solver;
mod surface;

use anyhow::Result;
use clap::Parser;
use core_config::{Config, ConfigContext, load_from};
use core_derive::BinaryKind;
use core_model::{Drawing, PlotModel};
use core_render::{DataBox, DrawEngine};
use core_surface::SystemClock;
use solver::NormalSolver;
use std::path::PathBuf;
use surface::{CountingRaster, FixedText};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

const SURFACE_W: u32 = 1280;
const SURFACE_H: u32 = 800;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "waveview", version, about = "Waveview plotting engine demo")]
struct Args {
    /// Rows to stream into the demo dataset.
    #[arg(long, default_value_t = 200_000)]
    rows: usize,
    /// Rows inserted between frames (streaming batch size).
    #[arg(long, default_value_t = 4_096)]
    batch: usize,
    /// Frame budget in milliseconds (overrides the config file).
    #[arg(long)]
    budget_ms: Option<u64>,
    /// LZ4-compress dataset chunks (overrides the config file).
    #[arg(long)]
    compress: bool,
    /// Optional configuration file path (overrides discovery of
    /// `waveview.toml`).
    #[arg(long = "config")]
    config: Option<PathBuf>,
}

fn configure_logging() -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::never(".", "waveview.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        error!(target: "runtime", %panic, "panic");
        default(panic);
    }));
}

fn build_model(cfg: &Config, args: &Args) -> PlotModel {
    let mut model = PlotModel::new();
    model.default_length = cfg.file.default.length;
    model.default_compress = cfg.file.default.compress || args.compress;
    model.default_width = cfg.file.default.width;
    model
}

fn run(cfg: Config, args: Args) -> Result<()> {
    let mut cfg = cfg;
    cfg.apply_context(ConfigContext {
        viewport_w: SURFACE_W,
        viewport_h: SURFACE_H,
    });
    let mut model = build_model(&cfg, &args);

    // Demo feed: a wrapping clock column and two channels derived from it.
    assert!(model.data_alloc(0, 3, Some(args.rows.max(1024))));
    model.group_define(0, "time", true, None);
    model.group_assign(0, 0, Some(0));

    let sine = model
        .figure_add(0, 0, 1, "sine")
        .expect("figure slot available");
    let ramp = model
        .figure_add(0, 0, 2, "ramp")
        .expect("figure slot available");
    model.figure_drawing(ramp, Drawing::Dash, 1);
    model.relayout(
        SURFACE_W,
        SURFACE_H,
        cfg.effective_mark_px,
        cfg.file.layout.axis_box_px,
        cfg.file.layout.label_box_px,
    );

    let mut engine = DrawEngine::new();
    engine.budget_ms = args.budget_ms.unwrap_or(cfg.file.render.budget_ms);
    let mut rast = CountingRaster::new(SURFACE_W, SURFACE_H);
    let mut text = FixedText;
    let clock = SystemClock::new();
    let mut databox = DataBox::default();

    info!(target: "runtime", rows = args.rows, batch = args.batch, budget_ms = engine.budget_ms, "startup");

    // Streaming loop: feed a batch, then render frames until the pass
    // completes, exactly as an input loop would between events.
    let mut fed = 0usize;
    let mut frames = 0u64;
    while fed < args.rows {
        let n = args.batch.min(args.rows - fed);
        for i in 0..n {
            let i = (fed + i) as f64;
            // The clock wraps every 4096 ticks; the unwrap hint repairs it.
            let t = (i % 4096.0) * 1e-3;
            let row = [t, (i * 7e-4).sin(), i * 5e-6];
            if !model.insert(0, &row) {
                break;
            }
        }
        fed += n;
        model.autoscale_unlocked();
        engine.invalidate();
        while !engine.frame(&mut model, &mut rast, &clock) {
            frames += 1;
        }
        frames += 1;
    }

    // Derived figures: difference of the two channels and a cubic fit.
    if model.figure_subtract_binary(sine, ramp, BinaryKind::Sub).is_none() {
        error!(target: "runtime", "difference figure unavailable");
    }
    let mut lsq = NormalSolver::default();
    match model.figure_subtract_polyfit(ramp, 3, &mut lsq) {
        Some(fit) => databox.show_polyfit(fit),
        None => error!(target: "runtime", "polynomial fit unavailable"),
    }
    model.autoscale_unlocked();
    engine.invalidate();
    while !engine.frame(&mut model, &mut rast, &clock) {
        frames += 1;
    }
    frames += 1;

    // Final presentation: replay sketches, then the overlays.
    engine.draw_sketches(&model, &mut rast);
    tracing::debug!(target: "runtime", clip = ?rast.clip(), "canvas clip installed");
    core_render::overlay::draw_legend(&model, &mut rast, &mut text);
    core_render::overlay::draw_marks(&mut model, &mut rast);
    databox.track_slice(&mut model, sine, 0.5);
    databox.draw(&mut model, &mut text, cfg.file.format.precision);

    let m = engine.metrics().snapshot();
    info!(
        target: "runtime",
        frames,
        yielded = m.yielded_frames,
        chunks_drawn = m.chunks_drawn,
        chunks_skipped = m.chunks_skipped,
        segments = m.segments_emitted,
        dots = m.dots_emitted,
        sketch_chunks = m.sketch_chunks_taken,
        "run complete"
    );
    println!(
        "streamed {} rows over {} frames ({} yields); {} segments, {} dots, {} canvas primitives",
        fed, frames, m.yielded_frames, m.segments_emitted, m.dots_emitted, rast.primitives()
    );
    for line in databox.lines(&mut model, cfg.file.format.precision) {
        println!("  {line}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let guard = configure_logging()?;
    install_panic_hook();
    let args = Args::parse();
    let cfg = load_from(args.config.clone())?;
    let result = run(cfg, args);
    drop(guard);
    result
}

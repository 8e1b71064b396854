//! Batch operators: resample and polynomial fit.
//!
//! Both run over the full valid span `[head, tail)` and reset state on every
//! recompute; neither can be extended incrementally (the resample lookup
//! stream is external, the fit is global). Writes here bypass the store's
//! streak memo, so each run explicitly releases the output column's range
//! entries when done.

use crate::op::DeriveOp;
use core_store::{DataStore, Dataset, RowCursor, col_value};
use core_surface::LeastSquares;
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Next source sample with a finite time, as `(t, y)`.
fn next_sample(src: &mut Dataset, cur: &mut RowCursor, src_time: i32, src_value: i32) -> Option<(f64, f64)> {
    loop {
        let id = cur.id;
        let row = src.read(cur)?;
        let t = col_value(row, id, src_time);
        if t.is_finite() {
            return Some((t, col_value(row, id, src_value)));
        }
    }
}

/// Hold-last interpolation between the bracketing samples.
fn interpolate(t: f64, prev: Option<(f64, f64)>, next: Option<(f64, f64)>) -> f64 {
    if !t.is_finite() {
        return f64::NAN;
    }
    match (prev, next) {
        (Some((t0, y0)), Some((t1, y1))) => {
            if t1 > t0 {
                y0 + (y1 - y0) * (t - t0) / (t1 - t0)
            } else {
                y1
            }
        }
        (Some((_, y0)), None) => y0,
        (None, Some((_, y1))) => y1,
        (None, None) => f64::NAN,
    }
}

/// Resample `src_data`'s `src_value` (sampled against `src_time`) at dataset
/// `d`'s `time` column, writing into `out_col`.
pub(crate) fn run_resample(
    store: &mut DataStore,
    d: usize,
    out_col: usize,
    src_data: usize,
    src_time: i32,
    src_value: i32,
    time: i32,
) -> bool {
    let ok = if d == src_data {
        resample_same(store, d, out_col, src_time, src_value, time)
    } else {
        resample_pair(store, d, out_col, src_data, src_time, src_value, time)
    };
    if ok {
        store.release_derived_ranges(d, out_col);
    }
    ok
}

fn resample_pair(
    store: &mut DataStore,
    d: usize,
    out_col: usize,
    src_data: usize,
    src_time: i32,
    src_value: i32,
    time: i32,
) -> bool {
    let Some((tgt, src)) = store.pair_mut(d, src_data) else {
        warn!(target: "derive", d, src_data, "resample source unavailable");
        return false;
    };
    let mut w = tgt.cursor();
    let mut s = src.cursor();
    let mut prev = None;
    let mut next = next_sample(src, &mut s, src_time, src_value);
    while !w.done() {
        let id = w.id;
        let Some(row) = tgt.write(&mut w) else {
            return false;
        };
        let t = col_value(row, id, time);
        // The bracket only moves forward; the time column is expected sorted.
        while let Some((t1, _)) = next {
            if t1 <= t {
                prev = next;
                next = next_sample(src, &mut s, src_time, src_value);
            } else {
                break;
            }
        }
        row[out_col] = interpolate(t, prev, next);
    }
    true
}

fn resample_same(
    store: &mut DataStore,
    d: usize,
    out_col: usize,
    src_time: i32,
    src_value: i32,
    time: i32,
) -> bool {
    let Some(ds) = store.dataset_mut(d) else {
        warn!(target: "derive", d, "resample target unavailable");
        return false;
    };
    let mut r = ds.cursor();
    let mut w = ds.cursor();
    let mut s = ds.cursor();
    let mut prev = None;
    let mut next = next_sample(ds, &mut s, src_time, src_value);
    while !r.done() {
        let id = r.id;
        let t = match ds.read(&mut r) {
            Some(row) => col_value(row, id, time),
            None => return false,
        };
        while let Some((t1, _)) = next {
            if t1 <= t {
                prev = next;
                next = next_sample(ds, &mut s, src_time, src_value);
            } else {
                break;
            }
        }
        let y = interpolate(t, prev, next);
        match ds.write(&mut w) {
            Some(row) => row[out_col] = y,
            None => return false,
        }
    }
    true
}

/// Fit a polynomial of `degree` to the rows of `(src_x, src_y)` visible in
/// `view`, store the coefficients into the op, and fill `out_col` with the
/// polynomial evaluated at `src_x` for every row.
pub(crate) fn run_polyfit(
    store: &mut DataStore,
    d: usize,
    out_col: usize,
    op: &mut DeriveOp,
    solver: &mut dyn LeastSquares,
) -> bool {
    let (src_x, src_y, degree, view) = match op {
        DeriveOp::Polyfit {
            src_x,
            src_y,
            degree,
            view,
            ..
        } => (*src_x, *src_y, *degree, *view),
        _ => return false,
    };
    if !solver.initiate(1, degree + 1, 1) {
        warn!(target: "derive", d, degree, "solver rejected fit geometry");
        return false;
    }
    store.ensure_range(d, src_x);
    store.ensure_range(d, src_y);
    let Some(ds) = store.dataset(d) else {
        return false;
    };
    let chunk_n = ds.chunk_n();
    let mut fed = 0usize;
    for k in 0..chunk_n {
        if chunk_outside(store, d, src_x, k, view.scale_x, view.offset_x)
            || chunk_outside(store, d, src_y, k, view.scale_y, view.offset_y)
        {
            continue;
        }
        let Some(ds) = store.dataset_mut(d) else {
            return false;
        };
        let mut bad = false;
        ds.for_each_in_chunk(k, |id, row| {
            let x = col_value(row, id, src_x);
            let y = col_value(row, id, src_y);
            if x.is_finite() && y.is_finite() && view.contains(x, y) {
                let mut obs: SmallVec<[f64; 16]> = SmallVec::new();
                let mut p = 1.0;
                for _ in 0..=degree {
                    obs.push(p);
                    p *= x;
                }
                obs.push(y);
                if !solver.insert(&obs) {
                    bad = true;
                }
                fed += 1;
            }
        });
        if bad {
            warn!(target: "derive", d, "solver rejected observations");
            return false;
        }
    }
    if fed <= degree || !solver.finalise() {
        warn!(target: "derive", d, fed, degree, "polynomial fit unsolvable");
        return false;
    }
    if let DeriveOp::Polyfit {
        coeffs, std_dev, ..
    } = op
    {
        coeffs.clear();
        for i in 0..=degree {
            coeffs.push(solver.coeff(i));
        }
        *std_dev = solver.std_dev(0);
    }
    debug!(target: "derive", d, fed, degree, "polynomial fitted");
    // Fill pass: evaluate at every row, visible or not.
    let Some(ds) = store.dataset_mut(d) else {
        return false;
    };
    let mut w = ds.cursor();
    while !w.done() {
        let id = w.id;
        let Some(row) = ds.write(&mut w) else {
            return false;
        };
        let x = col_value(row, id, src_x);
        row[out_col] = op.polyfit_eval(x);
    }
    store.release_derived_ranges(d, out_col);
    true
}

/// Is chunk `k`'s column range entirely outside the unit viewport under
/// `v * scale + offset`? Unknown or non-finite chunks are never skipped.
fn chunk_outside(store: &DataStore, d: usize, c: i32, k: usize, scale: f64, offset: f64) -> bool {
    let Some(r) = store.chunk_range(d, c, k) else {
        return false;
    };
    if !r.computed || !r.finite {
        return false;
    }
    let a = r.fmin * scale + offset;
    let b = r.fmax * scale + offset;
    let (lo, hi) = (a.min(b), a.max(b));
    hi < 0.0 || lo > 1.0
}

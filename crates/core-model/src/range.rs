//! Data-extent queries over the figures bound to an axis.
//!
//! The unconditional query unions the cached column ranges of every live,
//! non-hidden figure plotting on the axis (or on a slave of it). The
//! conditional variant restricts to rows whose *other* column is currently
//! visible on a secondary axis: whole chunks are skipped when their
//! condition range lies entirely outside the unit viewport, absorbed from
//! the range cache when entirely inside with known target bounds, and
//! scanned row by row otherwise.

use crate::axis::{Axis, composed};
use crate::figure::Figure;
use core_store::{DataStore, col_value};

/// Does axis `x` resolve to `a` directly or through a slave link?
fn resolves_to(axes: &[Axis], x: usize, a: usize) -> bool {
    x == a || axes[x].slave == Some(a)
}

fn merge(acc: &mut Option<(f64, f64)>, lo: f64, hi: f64) {
    match acc {
        Some((a, b)) => {
            *a = a.min(lo);
            *b = b.max(hi);
        }
        None => *acc = Some((lo, hi)),
    }
}

/// Union of column extents over figures plotting on axis `a`.
pub(crate) fn range_over_axis(
    store: &mut DataStore,
    axes: &[Axis],
    figures: &[Option<Figure>],
    a: usize,
) -> Option<(f64, f64)> {
    let mut acc = None;
    for fig in figures.iter().flatten() {
        if fig.hidden {
            continue;
        }
        for side in [fig.axis_x, fig.axis_y] {
            if resolves_to(axes, side, a) {
                let c = fig.column_on(side).expect("side just matched");
                if let Some((lo, hi)) = store.column_range(fig.dataset, c) {
                    merge(&mut acc, lo, hi);
                }
            }
        }
    }
    acc
}

/// Union of column extents over figures plotting on axis `a`, restricted to
/// rows visible on axis `b`. Falls back to the unconditional range when no
/// figure provides a condition column.
pub(crate) fn range_over_axis_cond(
    store: &mut DataStore,
    axes: &[Axis],
    figures: &[Option<Figure>],
    a: usize,
    b: usize,
) -> Option<(f64, f64)> {
    // (dataset, target column, condition column, condition transform)
    let mut jobs: Vec<(usize, i32, i32, f64, f64)> = Vec::new();
    for fig in figures.iter().flatten() {
        if fig.hidden {
            continue;
        }
        for side in [fig.axis_x, fig.axis_y] {
            if !resolves_to(axes, side, a) {
                continue;
            }
            let c = fig.column_on(side).expect("side just matched");
            let (other_axis, c_cond) = fig.other_side(side).expect("figure has two sides");
            if !resolves_to(axes, other_axis, b) {
                continue;
            }
            let (s, o) = composed(axes, other_axis);
            jobs.push((fig.dataset, c, c_cond, s, o));
        }
    }
    if jobs.is_empty() {
        return range_over_axis(store, axes, figures, a);
    }
    let mut acc = None;
    for (d, c, c_cond, s, o) in jobs {
        store.ensure_range(d, c);
        store.ensure_range(d, c_cond);
        let Some(chunk_n) = store.dataset(d).map(|ds| ds.chunk_n()) else {
            continue;
        };
        for k in 0..chunk_n {
            let cond = store.chunk_range(d, c_cond, k);
            if let Some(r) = cond.filter(|r| r.computed && r.finite) {
                let p = r.fmin * s + o;
                let q = r.fmax * s + o;
                let (lo, hi) = (p.min(q), p.max(q));
                if hi < 0.0 || lo > 1.0 {
                    continue;
                }
                if lo >= 0.0 && hi <= 1.0 {
                    // Every row of the chunk passes the condition; absorb the
                    // target bounds from the cache when they are known.
                    if let Some(t) = store
                        .chunk_range(d, c, k)
                        .filter(|t| t.computed && t.finite)
                    {
                        merge(&mut acc, t.fmin, t.fmax);
                        continue;
                    }
                }
            }
            let Some(ds) = store.dataset_mut(d) else {
                break;
            };
            ds.for_each_in_chunk(k, |id, row| {
                let vc = col_value(row, id, c_cond);
                let n = vc * s + o;
                if !(0.0..=1.0).contains(&n) {
                    return;
                }
                let v = col_value(row, id, c);
                if v.is_finite() {
                    merge(&mut acc, v, v);
                }
            });
        }
    }
    acc
}

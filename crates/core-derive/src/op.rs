//! Derive operators: tagged variants with their parameters and running state.
//!
//! Streaming operators produce one output per input row through [`DeriveOp::step`]
//! and carry state across calls (previous value, accumulator, unwrap offset).
//! Batch operators (`Resample`, `Polyfit`) are executed by the pipeline over
//! the full valid span and reset their state on every recompute.
//!
//! Non-finite inputs are not errors: filters hold their state through them
//! and emit what the operator's contract says (usually NaN, the running
//! value for the low-pass, the running sum for the accumulator).

use core_store::col_value;
use smallvec::{SmallVec, smallvec};

/// Highest accepted polynomial fit degree.
pub const POLY_DEGREE_MAX: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Sub,
    Add,
    Mul,
    /// `sqrt(a² + b²)`.
    Hyp,
}

/// Normalized viewport transform captured when a polynomial fit is taken.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewBox {
    pub scale_x: f64,
    pub offset_x: f64,
    pub scale_y: f64,
    pub offset_y: f64,
}

impl ViewBox {
    /// Does `(x, y)` fall inside the unit viewport under this transform?
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let nx = x * self.scale_x + self.offset_x;
        let ny = y * self.scale_y + self.offset_y;
        (0.0..=1.0).contains(&nx) && (0.0..=1.0).contains(&ny)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DeriveOp {
    #[default]
    Free,
    /// Monotonic time reconstruction over a wrapping base.
    TimeUnwrap {
        src: i32,
        unwrap: f64,
        prev: f64,
        prev2: f64,
    },
    /// Affine `scale * x + offset`.
    Scale { src: i32, scale: f64, offset: f64 },
    Binary {
        kind: BinaryKind,
        src_a: i32,
        src_b: i32,
    },
    /// First difference `x_n − x_{n−1}`.
    FilterDiff { src: i32, prev: f64 },
    /// Running sum of finite inputs.
    FilterCum { src: i32, sum: f64 },
    /// `(uint(x) & mask[lo..=hi]) >> lo`.
    FilterBitmask { src: i32, lo: u32, hi: u32 },
    /// One-pole IIR `y += gain * (x − y)`, seeded by the first finite input.
    FilterLowpass { src: i32, gain: f64, value: f64 },
    /// Piecewise-linear resample of `src_data`'s `src_value` against its
    /// `src_time`, evaluated at this dataset's `time` column.
    Resample {
        src_data: usize,
        src_time: i32,
        src_value: i32,
        time: i32,
    },
    /// Static polynomial in `src_x`, fitted to the rows visible in `view`.
    Polyfit {
        src_x: i32,
        src_y: i32,
        degree: usize,
        view: ViewBox,
        coeffs: SmallVec<[f64; POLY_DEGREE_MAX + 1]>,
        std_dev: f64,
    },
}

impl DeriveOp {
    pub fn is_free(&self) -> bool {
        matches!(self, DeriveOp::Free)
    }

    /// Batch operators run over the full span and never incrementally.
    pub fn is_batch(&self) -> bool {
        matches!(self, DeriveOp::Resample { .. } | DeriveOp::Polyfit { .. })
    }

    /// Columns this operator reads, as `(dataset, column)` with `own` filled
    /// in for same-dataset sources. The garbage sweep walks these.
    pub fn sources(&self, own: usize) -> SmallVec<[(usize, i32); 3]> {
        match *self {
            DeriveOp::Free => smallvec![],
            DeriveOp::TimeUnwrap { src, .. }
            | DeriveOp::Scale { src, .. }
            | DeriveOp::FilterDiff { src, .. }
            | DeriveOp::FilterCum { src, .. }
            | DeriveOp::FilterBitmask { src, .. }
            | DeriveOp::FilterLowpass { src, .. } => smallvec![(own, src)],
            DeriveOp::Binary { src_a, src_b, .. } => smallvec![(own, src_a), (own, src_b)],
            DeriveOp::Resample {
                src_data,
                src_time,
                src_value,
                time,
            } => smallvec![(own, time), (src_data, src_time), (src_data, src_value)],
            DeriveOp::Polyfit { src_x, src_y, .. } => smallvec![(own, src_x), (own, src_y)],
        }
    }

    /// Parameter-equality used by slot deduplication. Only `Scale` and
    /// `TimeUnwrap` deduplicate (their running state is excluded from the
    /// comparison); other operators always allocate a fresh slot.
    pub fn dedups_with(&self, other: &DeriveOp) -> bool {
        match (self, other) {
            (DeriveOp::TimeUnwrap { src: a, .. }, DeriveOp::TimeUnwrap { src: b, .. }) => a == b,
            (
                DeriveOp::Scale {
                    src: a,
                    scale: sa,
                    offset: oa,
                },
                DeriveOp::Scale {
                    src: b,
                    scale: sb,
                    offset: ob,
                },
            ) => a == b && sa == sb && oa == ob,
            _ => false,
        }
    }

    /// Forget running state ahead of a full recompute.
    pub fn reset_state(&mut self) {
        match self {
            DeriveOp::TimeUnwrap {
                unwrap,
                prev,
                prev2,
                ..
            } => {
                *unwrap = 0.0;
                *prev = f64::NAN;
                *prev2 = f64::NAN;
            }
            DeriveOp::FilterDiff { prev, .. } => *prev = f64::NAN,
            DeriveOp::FilterCum { sum, .. } => *sum = 0.0,
            DeriveOp::FilterLowpass { value, .. } => *value = f64::NAN,
            DeriveOp::Polyfit {
                coeffs, std_dev, ..
            } => {
                coeffs.clear();
                *std_dev = 0.0;
            }
            _ => {}
        }
    }

    /// Produce the output for one row of a streaming operator, updating
    /// state. Batch operators and `Free` return NaN (the pipeline never
    /// routes rows at them).
    pub fn step(&mut self, row: &[f64], row_id: u64) -> f64 {
        match self {
            DeriveOp::TimeUnwrap {
                src,
                unwrap,
                prev,
                prev2,
            } => {
                let x = col_value(row, row_id, *src);
                if !x.is_finite() {
                    return f64::NAN;
                }
                if prev.is_finite() && x < *prev {
                    if prev2.is_finite() && *prev < *prev2 {
                        // Second backward step in a row: the tail of a glitch,
                        // not another wrap. Hold the level.
                        *unwrap += *prev - x;
                    } else {
                        // The base ran to `prev` and restarted at zero; a
                        // restart below zero must not pull time backwards.
                        *unwrap += *prev - x.min(0.0);
                    }
                }
                *prev2 = *prev;
                *prev = x;
                x + *unwrap
            }
            DeriveOp::Scale { src, scale, offset } => {
                col_value(row, row_id, *src) * *scale + *offset
            }
            DeriveOp::Binary { kind, src_a, src_b } => {
                let a = col_value(row, row_id, *src_a);
                let b = col_value(row, row_id, *src_b);
                match kind {
                    BinaryKind::Sub => a - b,
                    BinaryKind::Add => a + b,
                    BinaryKind::Mul => a * b,
                    BinaryKind::Hyp => a.hypot(b),
                }
            }
            DeriveOp::FilterDiff { src, prev } => {
                let x = col_value(row, row_id, *src);
                if !x.is_finite() {
                    return f64::NAN;
                }
                let out = x - *prev;
                *prev = x;
                out
            }
            DeriveOp::FilterCum { src, sum } => {
                let x = col_value(row, row_id, *src);
                if x.is_finite() {
                    *sum += x;
                }
                *sum
            }
            DeriveOp::FilterBitmask { src, lo, hi } => {
                let x = col_value(row, row_id, *src);
                if !x.is_finite() {
                    return f64::NAN;
                }
                let span = hi.saturating_sub(*lo);
                let mask = if span >= 63 { u64::MAX } else { (1u64 << (span + 1)) - 1 };
                (((x as u64) >> *lo) & mask) as f64
            }
            DeriveOp::FilterLowpass { src, gain, value } => {
                let x = col_value(row, row_id, *src);
                if x.is_finite() {
                    if value.is_finite() {
                        *value += *gain * (x - *value);
                    } else {
                        *value = x;
                    }
                }
                *value
            }
            DeriveOp::Free | DeriveOp::Resample { .. } | DeriveOp::Polyfit { .. } => f64::NAN,
        }
    }

    /// Evaluate a fitted polynomial at `x` (Horner). NaN before a fit.
    pub fn polyfit_eval(&self, x: f64) -> f64 {
        if let DeriveOp::Polyfit { coeffs, .. } = self {
            if coeffs.is_empty() {
                return f64::NAN;
            }
            let mut acc = 0.0;
            for c in coeffs.iter().rev() {
                acc = acc * x + c;
            }
            acc
        } else {
            f64::NAN
        }
    }
}

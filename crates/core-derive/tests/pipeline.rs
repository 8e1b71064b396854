//! Cross-operator pipeline behavior against the public store API.

use core_derive::{BinaryKind, DeriveOp, DeriveTable, ViewBox};
use core_store::DataStore;
use core_surface::LeastSquares;
use proptest::prelude::*;
use smallvec::smallvec;

/// Closed-form straight-line solver, enough to exercise the fit path.
#[derive(Default)]
struct LineSolver {
    n: f64,
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
    syy: f64,
    b: [f64; 2],
}

impl LeastSquares for LineSolver {
    fn initiate(&mut self, _cascades: usize, nx: usize, nz: usize) -> bool {
        *self = Self::default();
        nx == 2 && nz == 1
    }

    fn insert(&mut self, row: &[f64]) -> bool {
        let (x, z) = (row[1], row[2]);
        self.n += 1.0;
        self.sx += x;
        self.sy += z;
        self.sxx += x * x;
        self.sxy += x * z;
        self.syy += z * z;
        true
    }

    fn finalise(&mut self) -> bool {
        let det = self.n * self.sxx - self.sx * self.sx;
        if det.abs() < 1e-12 {
            return false;
        }
        self.b[1] = (self.n * self.sxy - self.sx * self.sy) / det;
        self.b[0] = (self.sy - self.b[1] * self.sx) / self.n;
        true
    }

    fn coeff(&self, i: usize) -> f64 {
        self.b[i]
    }

    fn std_dev(&self, _z: usize) -> f64 {
        let mean = self.sy / self.n;
        ((self.syy / self.n - mean * mean).max(0.0)).sqrt()
    }
}

fn unwrap_op(src: i32) -> DeriveOp {
    DeriveOp::TimeUnwrap {
        src,
        unwrap: 0.0,
        prev: f64::NAN,
        prev2: f64::NAN,
    }
}

/// Wrapping clock reconstruction over stored rows.
#[test]
fn time_unwrap_over_dataset() {
    let mut store = DataStore::new();
    assert!(store.alloc(0, 1, 64, false));
    for v in [0.0, 0.5, 1.0, 0.2, 0.7, 1.2] {
        store.insert(0, &[v]);
    }
    let mut table = DeriveTable::new();
    let s = table.alloc(&store, 0, unwrap_op(0)).unwrap();
    assert!(table.compute_full(&mut store, 0, s, None));
    let got: Vec<f64> = (0..6).map(|id| store.row_at(0, id).unwrap()[1]).collect();
    assert_eq!(got, vec![0.0, 0.5, 1.0, 1.2, 1.7, 2.2]);
}

/// Binary subtract of a resampled external series: the resample holds the
/// single source sample at both boundaries.
#[test]
fn binary_subtract_after_resample() {
    let mut store = DataStore::new();
    assert!(store.alloc(0, 2, 16, false)); // X: (t, y)
    assert!(store.alloc(1, 2, 16, false)); // Y: (t, y)
    store.insert(0, &[0.0, 0.0]);
    store.insert(0, &[1.0, 10.0]);
    store.insert(1, &[0.5, 5.0]);

    let mut table = DeriveTable::new();
    let rs = table
        .alloc(
            &store,
            0,
            DeriveOp::Resample {
                src_data: 1,
                src_time: 0,
                src_value: 1,
                time: 0,
            },
        )
        .unwrap();
    assert!(table.compute_full(&mut store, 0, rs, None));
    let rs_col = DeriveTable::owned_col(&store, 0, rs).unwrap();

    let sub = table
        .alloc(
            &store,
            0,
            DeriveOp::Binary {
                kind: BinaryKind::Sub,
                src_a: 1,
                src_b: rs_col,
            },
        )
        .unwrap();
    assert!(table.compute_full(&mut store, 0, sub, None));
    let sub_col = DeriveTable::owned_col(&store, 0, sub).unwrap() as usize;

    assert_eq!(store.row_at(0, 0).unwrap()[sub_col], -5.0);
    assert_eq!(store.row_at(0, 1).unwrap()[sub_col], 5.0);
}

/// Resample interpolates linearly between bracketing source samples.
#[test]
fn resample_interpolates_between_samples() {
    let mut store = DataStore::new();
    assert!(store.alloc(0, 1, 16, false));
    assert!(store.alloc(1, 2, 16, false));
    for t in [0.25, 0.5, 0.75] {
        store.insert(0, &[t]);
    }
    store.insert(1, &[0.0, 0.0]);
    store.insert(1, &[1.0, 100.0]);

    let mut table = DeriveTable::new();
    let rs = table
        .alloc(
            &store,
            0,
            DeriveOp::Resample {
                src_data: 1,
                src_time: 0,
                src_value: 1,
                time: 0,
            },
        )
        .unwrap();
    assert!(table.compute_full(&mut store, 0, rs, None));
    let col = DeriveTable::owned_col(&store, 0, rs).unwrap() as usize;
    let got: Vec<f64> = (0..3).map(|id| store.row_at(0, id).unwrap()[col]).collect();
    assert_eq!(got, vec![25.0, 50.0, 75.0]);
}

/// Polynomial fit feeds only visible rows to the solver and fills the
/// output column with the fitted value at every row.
#[test]
fn polyfit_fits_visible_rows() {
    let mut store = DataStore::new();
    assert!(store.alloc(0, 2, 256, false));
    for i in 0..100 {
        let x = i as f64;
        store.insert(0, &[x, 1.0 + 0.5 * x]);
    }
    let mut table = DeriveTable::new();
    let s = table
        .alloc(
            &store,
            0,
            DeriveOp::Polyfit {
                src_x: 0,
                src_y: 1,
                degree: 1,
                // Unit viewport spanning x in [0, 99], y in [0, 60].
                view: ViewBox {
                    scale_x: 1.0 / 99.0,
                    offset_x: 0.0,
                    scale_y: 1.0 / 60.0,
                    offset_y: 0.0,
                },
                coeffs: smallvec![],
                std_dev: 0.0,
            },
        )
        .unwrap();
    let mut solver = LineSolver::default();
    assert!(table.compute_full(&mut store, 0, s, Some(&mut solver)));
    match table.op(0, s).unwrap() {
        DeriveOp::Polyfit { coeffs, .. } => {
            assert!((coeffs[0] - 1.0).abs() < 1e-6);
            assert!((coeffs[1] - 0.5).abs() < 1e-6);
        }
        other => panic!("unexpected op {other:?}"),
    }
    // The output column evaluates the polynomial even outside the view.
    let col = DeriveTable::owned_col(&store, 0, s).unwrap() as usize;
    let row = store.row_at(0, 90).unwrap();
    assert!((row[col] - 46.0).abs() < 1e-6);
}

proptest! {
    /// Time unwrap is non-decreasing over finite inputs.
    #[test]
    fn unwrap_is_non_decreasing(xs in proptest::collection::vec(-1e3f64..1e3, 1..200)) {
        let mut store = DataStore::new();
        prop_assert!(store.alloc(0, 1, 256, false));
        for x in &xs {
            store.insert(0, &[*x]);
        }
        let mut table = DeriveTable::new();
        let s = table.alloc(&store, 0, unwrap_op(0)).unwrap();
        prop_assert!(table.compute_full(&mut store, 0, s, None));
        let mut last = f64::NEG_INFINITY;
        for id in 0..xs.len() as u64 {
            let v = store.row_at(0, id).unwrap()[1];
            prop_assert!(v >= last, "unwrap went backwards: {} < {}", v, last);
            last = v;
        }
    }

    /// The running sum equals the prefix sum of finite inputs at every row.
    #[test]
    fn cumulative_matches_prefix_sums(
        xs in proptest::collection::vec(
            prop_oneof![4 => -1e3f64..1e3, 1 => Just(f64::NAN)],
            1..200,
        )
    ) {
        let mut store = DataStore::new();
        prop_assert!(store.alloc(0, 1, 256, false));
        let mut table = DeriveTable::new();
        table.alloc(&store, 0, DeriveOp::FilterCum { src: 0, sum: 0.0 }).unwrap();
        let mut expect = 0.0f64;
        for (i, x) in xs.iter().enumerate() {
            store.insert(0, &[*x]);
            table.extend(&mut store, 0);
            if x.is_finite() {
                expect += x;
            }
            let got = store.row_at(0, i as u64).unwrap()[1];
            prop_assert!((got - expect).abs() < 1e-9);
        }
    }

    /// Scale is element-wise affine; NaN in, NaN out.
    #[test]
    fn scale_is_elementwise_affine(
        xs in proptest::collection::vec(
            prop_oneof![4 => -1e6f64..1e6, 1 => Just(f64::NAN)],
            1..100,
        ),
        a in -10.0f64..10.0,
        b in -10.0f64..10.0,
    ) {
        let mut store = DataStore::new();
        prop_assert!(store.alloc(0, 1, 128, false));
        for x in &xs {
            store.insert(0, &[*x]);
        }
        let mut table = DeriveTable::new();
        let s = table
            .alloc(&store, 0, DeriveOp::Scale { src: 0, scale: a, offset: b })
            .unwrap();
        prop_assert!(table.compute_full(&mut store, 0, s, None));
        for (i, x) in xs.iter().enumerate() {
            let got = store.row_at(0, i as u64).unwrap()[1];
            if x.is_finite() {
                prop_assert_eq!(got, a * x + b);
            } else {
                prop_assert!(got.is_nan());
            }
        }
    }
}

//! Axis scaling behavior across the public model API.

use core_model::{AxisKind, PlotModel, SlaveMode};
use proptest::prelude::*;

/// Conditional auto-scale uses only rows visible on the conditioning axis.
#[test]
fn conditional_auto_scale_respects_zoom() {
    let mut m = PlotModel::new();
    assert!(m.data_alloc(0, 3, Some(256)));
    // First half: y1 spans [0, 100]; second half: y1 spans [-1, 1].
    for i in 0..100 {
        let y1 = if i < 50 {
            (i as f64) * 2.0 + 2.0 // 2..100
        } else {
            ((i - 50) as f64) / 25.0 - 1.0 // -1..1
        };
        assert!(m.insert(0, &[i as f64, y1, 0.0]));
    }
    let f = m.figure_add(0, 0, 1, "y1").unwrap();
    assert!(f < 24);
    let x = m.focused_x();
    let y = m.focused_y();
    // Zoom X onto the second half only.
    assert!(m.scale_manual(x, 50.0, 99.0));
    assert!(m.scale_auto_cond(y, x));
    // The visible rows span [-1, 1]; the first half's 100s are out of view.
    let top = m.conv(y, 1.0);
    let bottom = m.conv(y, -1.0);
    assert!((bottom - 0.0).abs() < 1e-9, "bottom at viewport floor");
    assert!((top - 1.0).abs() < 1e-9, "top at viewport ceiling");
    assert!(m.conv(y, 100.0) > 2.0, "out-of-view extremes map far outside");
}

/// Enabling then disabling a slave relation bakes the base transform in.
#[test]
fn slave_bake_out_composes_base_transform() {
    let mut m = PlotModel::new();
    assert!(m.data_alloc(0, 2, Some(64)));
    for i in 0..10 {
        m.insert(0, &[i as f64, i as f64]);
    }
    let b = m.focused_y();
    assert!(m.scale_manual(b, 0.0, 4.0));
    let (sb, ob) = m.composed(b);
    // Two figures share the focused axes; splitting the second one off
    // materializes a private Y axis to enslave.
    let f0 = m.figure_add(0, 0, 1, "base").unwrap();
    let f1 = m.figure_add(0, 0, 1, "other").unwrap();
    m.figure_make_individual_axes(f1);
    let a = m.figure(f1).unwrap().axis_y;
    assert_ne!(a, m.figure(f0).unwrap().axis_y);
    assert_eq!(m.axes()[a].kind, AxisKind::BusyY);
    assert!(m.slave(a, b, 2.0, 1.0, SlaveMode::Enable));
    // While enslaved: conv(a, v) == conv(b, 2v + 1).
    for v in [-1.0, 0.0, 0.5, 3.0] {
        assert!((m.conv(a, v) - m.conv(b, 2.0 * v + 1.0)).abs() < 1e-12);
    }
    assert!(m.slave(a, b, 0.0, 0.0, SlaveMode::Disable));
    let ax = &m.axes()[a];
    assert!(ax.slave.is_none());
    assert!((ax.scale - 2.0 * sb).abs() < 1e-12);
    assert!((ax.offset - (sb + ob)).abs() < 1e-12);
}

proptest! {
    /// Manual scale maps its endpoints onto the viewport bounds.
    #[test]
    fn manual_scale_hits_viewport_bounds(
        min in -1e6f64..1e6,
        span in 1e-3f64..1e6,
    ) {
        let mut m = PlotModel::new();
        let x = m.focused_x();
        let max = min + span;
        prop_assert!(m.scale_manual(x, min, max));
        prop_assert!((m.conv(x, min)).abs() < 1e-9);
        prop_assert!((m.conv(x, max) - 1.0).abs() < 1e-9);
    }

    /// The slave composition equals the algebraic form for any value.
    #[test]
    fn slave_composition_is_linear(
        sa in -10.0f64..10.0,
        oa in -10.0f64..10.0,
        v in -1e3f64..1e3,
    ) {
        prop_assume!(sa.abs() > 1e-6);
        let mut m = PlotModel::new();
        let b = m.focused_y();
        prop_assert!(m.scale_manual(b, -3.0, 7.0));
        prop_assume!(m.data_alloc(0, 2, Some(64)));
        prop_assume!(m.insert(0, &[0.0, 0.0]));
        let _f0 = m.figure_add(0, 0, 1, "base").unwrap();
        let f1 = m.figure_add(0, 0, 1, "other").unwrap();
        m.figure_make_individual_axes(f1);
        let a = m.figure(f1).unwrap().axis_y;
        prop_assert_ne!(a, b);
        prop_assert!(m.slave(a, b, sa, oa, SlaveMode::Enable));
        let (sb, ob) = (m.axes()[b].scale, m.axes()[b].offset);
        let want = v * sa * sb + oa * sb + ob;
        prop_assert!((m.conv(a, v) - want).abs() < 1e-6_f64.max(want.abs() * 1e-12));
    }
}

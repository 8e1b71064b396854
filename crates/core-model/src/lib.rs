//! Plot model: axes, figures, and the imperative engine API.
//!
//! [`PlotModel`] owns the data store, the derive table, the axis and figure
//! slot arrays, and the focused-axis state; every operation the scripting
//! frontend can issue hangs off it with small-integer handles bounded by the
//! capacity constants in `core_store::limits`. Cross-references (figure →
//! axis, figure → column, derive slot → column) are indices into these fixed
//! arrays; there is no owning pointer graph.
//!
//! Core invariants (must hold after every public call):
//! * The focused axes `on_x`/`on_y` always name busy axes of the right
//!   orientation and are never slaves (enslaving a focused axis retargets
//!   the focus to the base).
//! * A base axis is never itself a slave and a base cannot be re-enslaved.
//! * A figure's `axis_x` is `BusyX`, its `axis_y` is `BusyY`, never equal.
//! * After a figure is removed, no axis and no derive slot stays live that
//!   no remaining figure references (axis retirement plus derive sweep).
//!
//! Misuse is logged and the call is a no-op per the engine-wide contract;
//! handles returned by the constructors are `Option` so the frontend can
//! notice exhaustion, not structured errors.

pub mod axis;
pub mod figure;
pub mod layout;
mod range;

pub use axis::{Axis, AxisKind};
pub use figure::{Drawing, Figure};
pub use layout::Layout;

use axis::{composed, conv, scale_manual};
use core_derive::{BinaryKind, DeriveOp, DeriveTable, POLY_DEGREE_MAX, ViewBox};
use core_store::limits::{AXIS_MAX, FIGURE_MAX};
use core_store::{DataStore, Group};
use core_surface::LeastSquares;
use tracing::{debug, warn};

/// Slave relation transitions. See [`PlotModel::slave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveMode {
    /// Install the given relation.
    Enable,
    /// Derive the relation from the axis's current independent transform so
    /// the on-screen state is preserved.
    Hold,
    /// Dissolve the relation, baking the base's transform into the axis.
    Disable,
}

/// Filter operator selection for [`PlotModel::figure_subtract_filter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterSpec {
    Diff,
    Cum,
    Bitmask { lo: u32, hi: u32 },
    Lowpass { gain: f64 },
}

#[derive(Debug)]
pub struct PlotModel {
    store: DataStore,
    derive: DeriveTable,
    axes: Box<[Axis]>,
    figures: Box<[Option<Figure>]>,
    on_x: usize,
    on_y: usize,
    layout: Layout,
    /// Defaults applied by `data_alloc` / `figure_add`.
    pub default_length: usize,
    pub default_compress: bool,
    pub default_width: u32,
}

impl Default for PlotModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PlotModel {
    pub fn new() -> Self {
        let mut axes: Box<[Axis]> = (0..AXIS_MAX).map(|_| Axis::default()).collect();
        axes[0] = Axis::fresh(AxisKind::BusyX);
        axes[1] = Axis::fresh(AxisKind::BusyY);
        Self {
            store: DataStore::new(),
            derive: DeriveTable::new(),
            axes,
            figures: (0..FIGURE_MAX).map(|_| None).collect(),
            on_x: 0,
            on_y: 1,
            layout: Layout::default(),
            default_length: 1 << 20,
            default_compress: false,
            default_width: 2,
        }
    }

    // Accessors -----------------------------------------------------------

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DataStore {
        &mut self.store
    }

    pub fn derive(&self) -> &DeriveTable {
        &self.derive
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn figures(&self) -> &[Option<Figure>] {
        &self.figures
    }

    pub fn figure(&self, f: usize) -> Option<&Figure> {
        self.figures.get(f)?.as_ref()
    }

    pub fn focused_x(&self) -> usize {
        self.on_x
    }

    pub fn focused_y(&self) -> usize {
        self.on_y
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Effective `(scale, offset)` of axis `a` with slave composition.
    pub fn composed(&self, a: usize) -> (f64, f64) {
        composed(&self.axes, a)
    }

    /// Normalized viewport coordinate of `v` on axis `a`.
    pub fn conv(&self, a: usize, v: f64) -> f64 {
        conv(&self.axes, a, v)
    }

    // Data ----------------------------------------------------------------

    /// Allocate dataset `d`; `length` falls back to the model default.
    pub fn data_alloc(&mut self, d: usize, column_n: usize, length: Option<usize>) -> bool {
        self.store.alloc(
            d,
            column_n,
            length.unwrap_or(self.default_length),
            self.default_compress,
        )
    }

    /// Append a row and extend the derived columns over it.
    pub fn insert(&mut self, d: usize, row: &[f64]) -> bool {
        if !self.store.insert(d, row) {
            return false;
        }
        self.derive.extend(&mut self.store, d);
        true
    }

    pub fn data_clean(&mut self, d: usize) {
        self.store.clean(d);
    }

    pub fn data_resize(&mut self, d: usize, length: usize) -> bool {
        self.store.resize(d, length)
    }

    pub fn group_define(
        &mut self,
        g: usize,
        label: &str,
        unwrap_time: bool,
        default_scale: Option<(f64, f64)>,
    ) -> bool {
        let mut group = Group::new(label);
        group.unwrap_time = unwrap_time;
        group.default_scale = default_scale;
        self.store.group_set(g, group)
    }

    pub fn group_assign(&mut self, d: usize, c: i32, g: Option<usize>) -> bool {
        self.store.map_column(d, c, g)
    }

    // Axes ----------------------------------------------------------------

    fn axis_ok(&self, a: usize) -> bool {
        if a >= AXIS_MAX || self.axes[a].is_free() {
            warn!(target: "model.axis", a, "axis handle invalid");
            return false;
        }
        true
    }

    /// First free axis slot initialized to `kind`.
    fn axis_alloc(&mut self, kind: AxisKind) -> Option<usize> {
        for (i, ax) in self.axes.iter_mut().enumerate() {
            if ax.is_free() {
                *ax = Axis::fresh(kind);
                return Some(i);
            }
        }
        warn!(target: "model.axis", "no free axis");
        None
    }

    pub fn axis_label(&mut self, a: usize, label: &str) {
        if self.axis_ok(a) {
            self.axes[a].label = label.to_string();
        }
    }

    pub fn axis_compact(&mut self, a: usize, on: bool) {
        if self.axis_ok(a) {
            self.axes[a].compact = on;
        }
    }

    pub fn axis_exponent(&mut self, a: usize, on: bool) {
        if self.axis_ok(a) {
            self.axes[a].exponent = on;
        }
    }

    pub fn axis_lock(&mut self, a: usize, on: bool) {
        if self.axis_ok(a) {
            self.axes[a].lock_scale = on;
        }
    }

    /// Focus axis `a` for subsequent figure binding and interaction. Slaves
    /// retarget to their base.
    pub fn focus(&mut self, a: usize) {
        if !self.axis_ok(a) {
            return;
        }
        let a = self.axes[a].slave.unwrap_or(a);
        match self.axes[a].kind {
            AxisKind::BusyX => self.on_x = a,
            AxisKind::BusyY => self.on_y = a,
            AxisKind::Free => {}
        }
    }

    pub fn scale_manual(&mut self, a: usize, min: f64, max: f64) -> bool {
        self.axis_ok(a) && scale_manual(&mut self.axes, a, min, max)
    }

    /// Auto-scale `a` to the extent of its figures, inset by the mark width
    /// so border samples stay visible.
    pub fn scale_auto(&mut self, a: usize) -> bool {
        if !self.axis_ok(a) {
            return false;
        }
        let Some((min, max)) = range::range_over_axis(&mut self.store, &self.axes, &self.figures, a)
        else {
            warn!(target: "model.axis", a, "auto scale found no finite data");
            return false;
        };
        let (min, max) = self.inset(a, min, max);
        scale_manual(&mut self.axes, a, min, max)
    }

    /// Auto-scale `a` using only rows currently visible on axis `b`.
    pub fn scale_auto_cond(&mut self, a: usize, b: usize) -> bool {
        if !self.axis_ok(a) || !self.axis_ok(b) {
            return false;
        }
        let Some((min, max)) =
            range::range_over_axis_cond(&mut self.store, &self.axes, &self.figures, a, b)
        else {
            warn!(target: "model.axis", a, b, "conditional auto scale found no finite data");
            return false;
        };
        let (min, max) = self.inset(a, min, max);
        scale_manual(&mut self.axes, a, min, max)
    }

    /// Pad a data span by the mark width expressed in data units.
    fn inset(&self, a: usize, min: f64, max: f64) -> (f64, f64) {
        let frac = match self.axes[a].kind {
            AxisKind::BusyX => self.layout.mark_frac_x(),
            _ => self.layout.mark_frac_y(),
        };
        if !(0.0..0.5).contains(&frac) || max <= min {
            return (min, max);
        }
        let pad = (max - min) * frac / (1.0 - 2.0 * frac);
        (min - pad, max + pad)
    }

    /// Zoom so the normalized position `origin` stays fixed. `z > 1` zooms in.
    pub fn scale_zoom(&mut self, a: usize, origin: f64, z: f64) -> bool {
        if !self.axis_ok(a) || !(z.is_finite() && z > 0.0) {
            return false;
        }
        let a = self.axes[a].slave.unwrap_or(a);
        let ax = &mut self.axes[a];
        ax.scale *= z;
        ax.offset = origin - (origin - ax.offset) * z;
        true
    }

    /// Pan by a normalized viewport delta.
    pub fn scale_move(&mut self, a: usize, delta: f64) -> bool {
        if !self.axis_ok(a) || !delta.is_finite() {
            return false;
        }
        let a = self.axes[a].slave.unwrap_or(a);
        self.axes[a].offset += delta;
        true
    }

    /// Make one data unit span the same pixel count on the focused X and Y
    /// axes, adjusting Y around the viewport center.
    pub fn scale_equal(&mut self) -> bool {
        let (w, h) = (self.layout.viewport.width(), self.layout.viewport.height());
        if w <= 0.0 || h <= 0.0 {
            return false;
        }
        let (sx, _) = composed(&self.axes, self.on_x);
        let ay = &mut self.axes[self.on_y];
        let center = (0.5 - ay.offset) / ay.scale;
        let scale = sx * w / h;
        if !scale.is_finite() || scale == 0.0 {
            warn!(target: "model.axis", "equal scale degenerate");
            return false;
        }
        ay.scale = scale;
        ay.offset = 0.5 - center * scale;
        true
    }

    /// Snap every other axis of the focused orientation onto the focused
    /// axis's tick grid (same normalized pitch, aligned phase).
    pub fn scale_grid_align(&mut self) -> bool {
        for &focus in &[self.on_x, self.on_y] {
            let kind = self.axes[focus].kind;
            let (fs, fo) = composed(&self.axes, focus);
            if fs == 0.0 || !fs.is_finite() {
                continue;
            }
            let step = nice_step(1.0 / fs.abs());
            let pitch = step * fs;
            let phase = fo.rem_euclid(pitch.abs());
            for i in 0..AXIS_MAX {
                if i == focus || self.axes[i].kind != kind || self.axes[i].slave.is_some() {
                    continue;
                }
                let ax = &mut self.axes[i];
                let own_step = nice_step(1.0 / ax.scale.abs().max(f64::MIN_POSITIVE));
                ax.scale = pitch / own_step;
                let own_phase = ax.offset.rem_euclid(pitch.abs());
                ax.offset += phase - own_phase;
            }
        }
        true
    }

    /// Partition the vertical viewport into equal bands, one per busy Y
    /// axis, separated by a mark-width gap, and auto-scale each into its
    /// band.
    pub fn scale_stacked(&mut self) -> bool {
        let stacked: Vec<usize> = (0..AXIS_MAX)
            .filter(|&i| self.axes[i].kind == AxisKind::BusyY && self.axes[i].slave.is_none())
            .collect();
        let n = stacked.len();
        if n == 0 {
            return false;
        }
        let gap = self.layout.mark_frac_y().min(0.45 / n as f64);
        for (band, &a) in stacked.iter().enumerate() {
            let Some((min, max)) =
                range::range_over_axis(&mut self.store, &self.axes, &self.figures, a)
            else {
                continue;
            };
            let lo = band as f64 / n as f64 + gap / 2.0;
            let hi = (band + 1) as f64 / n as f64 - gap / 2.0;
            let span = if max > min { max - min } else { 1.0 };
            let ax = &mut self.axes[a];
            ax.scale = (hi - lo) / span;
            ax.offset = lo - min * ax.scale;
        }
        true
    }

    /// Manage the slave relation of `a` under base `b`.
    pub fn slave(&mut self, a: usize, b: usize, scale: f64, offset: f64, mode: SlaveMode) -> bool {
        if !self.axis_ok(a) {
            return false;
        }
        if mode == SlaveMode::Disable {
            let Some(base) = self.axes[a].slave else {
                warn!(target: "model.axis", a, "axis is not a slave");
                return false;
            };
            let (bs, bo) = (self.axes[base].scale, self.axes[base].offset);
            let ax = &mut self.axes[a];
            ax.scale *= bs;
            ax.offset = ax.offset * bs + bo;
            ax.slave = None;
            debug!(target: "model.axis", a, base, "slave relation baked out");
            return true;
        }
        if !self.axis_ok(b) || a == b {
            return false;
        }
        if self.axes[a].kind != self.axes[b].kind {
            warn!(target: "model.axis", a, b, "slave orientation mismatch");
            return false;
        }
        if self.axes[b].slave.is_some() {
            warn!(target: "model.axis", a, b, "base axis must not be a slave");
            return false;
        }
        if self.axes.iter().any(|ax| ax.slave == Some(a)) {
            warn!(target: "model.axis", a, "axis serving as base cannot be enslaved");
            return false;
        }
        let (rs, ro) = match mode {
            SlaveMode::Enable => (scale, offset),
            SlaveMode::Hold => {
                let (bs, bo) = (self.axes[b].scale, self.axes[b].offset);
                if bs == 0.0 {
                    warn!(target: "model.axis", b, "base scale degenerate");
                    return false;
                }
                let ax = &self.axes[a];
                (ax.scale / bs, (ax.offset - bo) / bs)
            }
            SlaveMode::Disable => unreachable!("handled above"),
        };
        let ax = &mut self.axes[a];
        ax.slave = Some(b);
        ax.scale = rs;
        ax.offset = ro;
        // A slave cannot stay focused.
        if self.on_x == a {
            self.on_x = b;
        }
        if self.on_y == a {
            self.on_y = b;
        }
        debug!(target: "model.axis", a, b, ?mode, "slave relation set");
        true
    }

    // Figures -------------------------------------------------------------

    /// Add a figure plotting `(col_x, col_y)` of dataset `d` on the focused
    /// axes. A time-unwrap group hint on the X column routes it through a
    /// (deduplicated) unwrap slot; a default scale on the Y column's group
    /// is applied to the focused Y axis.
    pub fn figure_add(&mut self, d: usize, col_x: i32, col_y: i32, label: &str) -> Option<usize> {
        let Some(ds) = self.store.dataset(d) else {
            warn!(target: "model.figure", d, "figure on unknown dataset");
            return None;
        };
        let width = ds.row_width() as i32;
        if !(-1..width).contains(&col_x) || !(-1..width).contains(&col_y) {
            warn!(target: "model.figure", d, col_x, col_y, "figure column out of range");
            return None;
        }
        let slot = (0..FIGURE_MAX).find(|&i| self.figures[i].is_none());
        let Some(f) = slot else {
            warn!(target: "model.figure", "no free figure");
            return None;
        };
        let mut col_x = col_x;
        let unwrap_hint = self
            .store
            .column_group(d, col_x)
            .is_some_and(|g| g.unwrap_time);
        if unwrap_hint {
            self.derive.extend(&mut self.store, d);
            if let Some(s) = self.derive.alloc(
                &self.store,
                d,
                DeriveOp::TimeUnwrap {
                    src: col_x,
                    unwrap: 0.0,
                    prev: f64::NAN,
                    prev2: f64::NAN,
                },
            ) && self.derive.compute_full(&mut self.store, d, s, None)
            {
                col_x = DeriveTable::owned_col(&self.store, d, s).expect("dataset exists");
            }
        }
        let default_scale = self
            .store
            .column_group(d, col_y)
            .and_then(|g| g.default_scale);
        if let Some((lo, hi)) = default_scale {
            scale_manual(&mut self.axes, self.on_y, lo, hi);
        }
        self.figures[f] = Some(Figure {
            dataset: d,
            col_x,
            col_y,
            axis_x: self.on_x,
            axis_y: self.on_y,
            drawing: Drawing::Line,
            width: self.default_width,
            hidden: false,
            label: label.to_string(),
        });
        debug!(target: "model.figure", f, d, col_x, col_y, "figure added");
        Some(f)
    }

    fn fig_ok(&self, f: usize) -> bool {
        if f >= FIGURE_MAX || self.figures[f].is_none() {
            warn!(target: "model.figure", f, "figure handle invalid");
            return false;
        }
        true
    }

    /// Remove figure `f`, retire axes nothing references anymore, and sweep
    /// orphaned derive slots.
    pub fn figure_remove(&mut self, f: usize) {
        if !self.fig_ok(f) {
            return;
        }
        self.figures[f] = None;
        self.retire_axes();
        self.sweep_derive();
        debug!(target: "model.figure", f, "figure removed");
    }

    pub fn figure_hide(&mut self, f: usize, hidden: bool) {
        if self.fig_ok(f) {
            self.figures[f].as_mut().expect("checked").hidden = hidden;
        }
    }

    pub fn figure_drawing(&mut self, f: usize, drawing: Drawing, width: u32) {
        if self.fig_ok(f) {
            let fig = self.figures[f].as_mut().expect("checked");
            fig.drawing = drawing;
            fig.width = width;
        }
    }

    pub fn figure_label(&mut self, f: usize, label: &str) {
        if self.fig_ok(f) {
            self.figures[f].as_mut().expect("checked").label = label.to_string();
        }
    }

    /// Rebind `f` to the focused axes, retiring abandoned ones.
    pub fn figure_move_axes(&mut self, f: usize) {
        if !self.fig_ok(f) {
            return;
        }
        let fig = self.figures[f].as_mut().expect("checked");
        fig.axis_x = self.on_x;
        fig.axis_y = self.on_y;
        self.retire_axes();
    }

    /// Give `f` private copies of any axis it currently shares.
    pub fn figure_make_individual_axes(&mut self, f: usize) {
        if !self.fig_ok(f) {
            return;
        }
        let (ax, ay) = {
            let fig = self.figures[f].as_ref().expect("checked");
            (fig.axis_x, fig.axis_y)
        };
        let x_shared = self
            .figures
            .iter()
            .enumerate()
            .any(|(i, g)| i != f && g.as_ref().is_some_and(|g| g.axis_x == ax || g.axis_y == ax));
        let y_shared = self
            .figures
            .iter()
            .enumerate()
            .any(|(i, g)| i != f && g.as_ref().is_some_and(|g| g.axis_x == ay || g.axis_y == ay));
        if x_shared && let Some(n) = self.axis_alloc(AxisKind::BusyX) {
            let src = self.axes[ax].clone();
            self.axes[n] = Axis {
                kind: AxisKind::BusyX,
                slave: None,
                ..src
            };
            self.figures[f].as_mut().expect("checked").axis_x = n;
        }
        if y_shared && let Some(n) = self.axis_alloc(AxisKind::BusyY) {
            let src = self.axes[ay].clone();
            self.axes[n] = Axis {
                kind: AxisKind::BusyY,
                slave: None,
                ..src
            };
            self.figures[f].as_mut().expect("checked").axis_y = n;
        }
    }

    /// Swap two figure slots (paint order control).
    pub fn figure_exchange(&mut self, f1: usize, f2: usize) {
        if f1 < FIGURE_MAX && f2 < FIGURE_MAX && f1 != f2 {
            self.figures.swap(f1, f2);
        }
    }

    /// Free axes referenced by no figure, excepting the focused pair and
    /// bases of live slaves.
    fn retire_axes(&mut self) {
        for a in 0..AXIS_MAX {
            if self.axes[a].is_free() || a == self.on_x || a == self.on_y {
                continue;
            }
            let used = self
                .figures
                .iter()
                .flatten()
                .any(|g| g.axis_x == a || g.axis_y == a);
            let is_base = self.axes.iter().any(|ax| ax.slave == Some(a));
            if !used && !is_base {
                self.axes[a] = Axis::default();
                debug!(target: "model.axis", a, "axis retired");
            }
        }
    }

    /// Columns read by live figures, for the derive sweep.
    fn referenced_columns(&self) -> Vec<(usize, i32)> {
        self.figures
            .iter()
            .flatten()
            .flat_map(|g| [(g.dataset, g.col_x), (g.dataset, g.col_y)])
            .collect()
    }

    fn sweep_derive(&mut self) {
        let referenced = self.referenced_columns();
        self.derive.sweep(&mut self.store, &referenced);
    }

    // Derived figures -----------------------------------------------------

    /// Clone geometry from `src`, plotting `col_y` instead.
    fn add_figure_like(&mut self, src: &Figure, col_y: i32, label: String) -> Option<usize> {
        let slot = (0..FIGURE_MAX).find(|&i| self.figures[i].is_none());
        let Some(f) = slot else {
            warn!(target: "model.figure", "no free figure for derived plot");
            self.sweep_derive();
            return None;
        };
        self.figures[f] = Some(Figure {
            col_y,
            hidden: false,
            label,
            ..src.clone()
        });
        Some(f)
    }

    /// Route figure `f`'s X column through a (deduplicated) time unwrap.
    pub fn figure_subtract_time_unwrap(&mut self, f: usize) -> bool {
        if !self.fig_ok(f) {
            return false;
        }
        let fig = self.figures[f].as_ref().expect("checked").clone();
        self.derive.extend(&mut self.store, fig.dataset);
        let Some(s) = self.derive.alloc(
            &self.store,
            fig.dataset,
            DeriveOp::TimeUnwrap {
                src: fig.col_x,
                unwrap: 0.0,
                prev: f64::NAN,
                prev2: f64::NAN,
            },
        ) else {
            return false;
        };
        if !self.derive.compute_full(&mut self.store, fig.dataset, s, None) {
            self.sweep_derive();
            return false;
        }
        let col = DeriveTable::owned_col(&self.store, fig.dataset, s).expect("dataset exists");
        self.figures[f].as_mut().expect("checked").col_x = col;
        true
    }

    /// New figure plotting `scale * y + offset` of figure `f`'s Y column.
    pub fn figure_subtract_scale(&mut self, f: usize, scale: f64, offset: f64) -> Option<usize> {
        if !self.fig_ok(f) {
            return None;
        }
        let fig = self.figures[f].as_ref().expect("checked").clone();
        self.derive.extend(&mut self.store, fig.dataset);
        let s = self.derive.alloc(
            &self.store,
            fig.dataset,
            DeriveOp::Scale {
                src: fig.col_y,
                scale,
                offset,
            },
        )?;
        if !self.derive.compute_full(&mut self.store, fig.dataset, s, None) {
            self.sweep_derive();
            return None;
        }
        let col = DeriveTable::owned_col(&self.store, fig.dataset, s)?;
        self.add_figure_like(&fig, col, format!("{} scaled", fig.label))
    }

    /// New figure plotting a stateful filter of figure `f`'s Y column.
    pub fn figure_subtract_filter(&mut self, f: usize, spec: FilterSpec) -> Option<usize> {
        if !self.fig_ok(f) {
            return None;
        }
        let fig = self.figures[f].as_ref().expect("checked").clone();
        let src = fig.col_y;
        let op = match spec {
            FilterSpec::Diff => DeriveOp::FilterDiff {
                src,
                prev: f64::NAN,
            },
            FilterSpec::Cum => DeriveOp::FilterCum { src, sum: 0.0 },
            FilterSpec::Bitmask { lo, hi } => {
                if lo > hi || hi > 63 {
                    warn!(target: "model.figure", f, lo, hi, "bitmask bounds invalid");
                    return None;
                }
                DeriveOp::FilterBitmask { src, lo, hi }
            }
            FilterSpec::Lowpass { gain } => {
                if !(gain.is_finite() && (0.0..=1.0).contains(&gain)) {
                    warn!(target: "model.figure", f, gain, "lowpass gain invalid");
                    return None;
                }
                DeriveOp::FilterLowpass {
                    src,
                    gain,
                    value: f64::NAN,
                }
            }
        };
        self.derive.extend(&mut self.store, fig.dataset);
        let s = self.derive.alloc(&self.store, fig.dataset, op)?;
        if !self.derive.compute_full(&mut self.store, fig.dataset, s, None) {
            self.sweep_derive();
            return None;
        }
        let col = DeriveTable::owned_col(&self.store, fig.dataset, s)?;
        self.add_figure_like(&fig, col, format!("{} filtered", fig.label))
    }

    /// New figure plotting a binary combination of two figures' Y columns.
    /// When the figures live on different datasets the second operand is
    /// first resampled onto the first figure's time base; failure to obtain
    /// that resample aborts the whole operation.
    pub fn figure_subtract_binary(
        &mut self,
        f1: usize,
        f2: usize,
        kind: BinaryKind,
    ) -> Option<usize> {
        if !self.fig_ok(f1) || !self.fig_ok(f2) {
            return None;
        }
        let a = self.figures[f1].as_ref().expect("checked").clone();
        let b = self.figures[f2].as_ref().expect("checked").clone();
        self.derive.extend(&mut self.store, a.dataset);
        let src_b = if a.dataset == b.dataset {
            b.col_y
        } else {
            let Some(rs) = self.derive.alloc(
                &self.store,
                a.dataset,
                DeriveOp::Resample {
                    src_data: b.dataset,
                    src_time: b.col_x,
                    src_value: b.col_y,
                    time: a.col_x,
                },
            ) else {
                warn!(target: "model.figure", f1, f2, "unable to get resample subtract");
                return None;
            };
            if !self.derive.compute_full(&mut self.store, a.dataset, rs, None) {
                warn!(target: "model.figure", f1, f2, "unable to get resample subtract");
                self.derive.free(&mut self.store, a.dataset, rs);
                return None;
            }
            DeriveTable::owned_col(&self.store, a.dataset, rs)?
        };
        let s = self.derive.alloc(
            &self.store,
            a.dataset,
            DeriveOp::Binary {
                kind,
                src_a: a.col_y,
                src_b,
            },
        )?;
        if !self.derive.compute_full(&mut self.store, a.dataset, s, None) {
            self.sweep_derive();
            return None;
        }
        let col = DeriveTable::owned_col(&self.store, a.dataset, s)?;
        self.add_figure_like(&a, col, format!("{} vs {}", a.label, b.label))
    }

    /// New figure plotting a polynomial fitted to figure `f`'s visible rows.
    pub fn figure_subtract_polyfit(
        &mut self,
        f: usize,
        degree: usize,
        solver: &mut dyn LeastSquares,
    ) -> Option<usize> {
        if !self.fig_ok(f) {
            return None;
        }
        if degree > POLY_DEGREE_MAX {
            warn!(target: "model.figure", f, degree, "polynomial degree out of range");
            return None;
        }
        let fig = self.figures[f].as_ref().expect("checked").clone();
        let (sx, ox) = composed(&self.axes, fig.axis_x);
        let (sy, oy) = composed(&self.axes, fig.axis_y);
        let view = ViewBox {
            scale_x: sx,
            offset_x: ox,
            scale_y: sy,
            // The Y offset composes from the Y axis; the historical X/Y mixup
            // here is deliberately not reproduced.
            offset_y: oy,
        };
        self.derive.extend(&mut self.store, fig.dataset);
        let s = self.derive.alloc(
            &self.store,
            fig.dataset,
            DeriveOp::Polyfit {
                src_x: fig.col_x,
                src_y: fig.col_y,
                degree,
                view,
                coeffs: Default::default(),
                std_dev: 0.0,
            },
        )?;
        if !self
            .derive
            .compute_full(&mut self.store, fig.dataset, s, Some(solver))
        {
            self.derive.free(&mut self.store, fig.dataset, s);
            return None;
        }
        let col = DeriveTable::owned_col(&self.store, fig.dataset, s)?;
        let g = self.add_figure_like(&fig, col, format!("{} fit", fig.label))?;
        if let Some(fig) = self.figures[g].as_mut() {
            fig.drawing = Drawing::Line;
        }
        Some(g)
    }

    /// Toggle between "both source figures visible" and "their difference
    /// visible", reusing existing derived state when present.
    pub fn figure_subtract_switch(&mut self, f1: usize, f2: usize) -> bool {
        if !self.fig_ok(f1) || !self.fig_ok(f2) {
            return false;
        }
        let a = self.figures[f1].as_ref().expect("checked").clone();
        // An existing difference figure: same dataset, Y column owned by a
        // Binary slot whose first operand is f1's Y column.
        let existing = (0..FIGURE_MAX).find(|&g| {
            self.figures[g].as_ref().is_some_and(|fig| {
                if fig.dataset != a.dataset {
                    return false;
                }
                let column_n = match self.store.dataset(fig.dataset) {
                    Some(ds) => ds.column_n() as i32,
                    None => return false,
                };
                if fig.col_y < column_n {
                    return false;
                }
                let s = (fig.col_y - column_n) as usize;
                matches!(
                    self.derive.op(fig.dataset, s),
                    Some(DeriveOp::Binary { src_a, .. }) if *src_a == a.col_y
                )
            })
        });
        let g = match existing {
            Some(g) => g,
            None => {
                let Some(g) = self.figure_subtract_binary(f1, f2, BinaryKind::Sub) else {
                    return false;
                };
                // Fresh switch starts in "difference visible" state.
                self.figures[g].as_mut().expect("just added").hidden = true;
                g
            }
        };
        let show_diff = self.figures[g].as_ref().expect("checked").hidden;
        self.figures[g].as_mut().expect("checked").hidden = !show_diff;
        self.figures[f1].as_mut().expect("checked").hidden = show_diff;
        self.figures[f2].as_mut().expect("checked").hidden = show_diff;
        true
    }

    // Layout --------------------------------------------------------------

    /// Recompute the viewport layout for a surface size and box geometry.
    pub fn relayout(
        &mut self,
        surface_w: u32,
        surface_h: u32,
        mark_px: u32,
        axis_box_px: u32,
        label_box_px: u32,
    ) {
        self.layout = Layout::compute(
            &self.axes,
            surface_w,
            surface_h,
            mark_px,
            axis_box_px,
            label_box_px,
        );
    }

    /// Auto-scale every unlocked busy axis (driver convenience after a data
    /// change).
    pub fn autoscale_unlocked(&mut self) {
        for a in 0..AXIS_MAX {
            if !self.axes[a].is_free() && !self.axes[a].lock_scale && self.axes[a].slave.is_none() {
                self.scale_auto(a);
            }
        }
    }
}

/// Largest 1/2/5·10ⁿ step not exceeding `span / 4` (at least four ticks in
/// view).
fn nice_step(span: f64) -> f64 {
    if !(span.is_finite() && span > 0.0) {
        return 1.0;
    }
    let target = span / 4.0;
    let mag = 10f64.powf(target.log10().floor());
    let norm = target / mag;
    let factor = if norm >= 5.0 {
        5.0
    } else if norm >= 2.0 {
        2.0
    } else {
        1.0
    };
    factor * mag
}

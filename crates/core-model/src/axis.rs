//! Axes: linear value → normalized viewport maps with slave coupling.
//!
//! An axis maps a data value to `[0, 1]` as `v * scale + offset`. A slave
//! axis composes its own `(scale, offset)` *under* its base's transform:
//!
//! ```text
//! conv(a, v) = conv(base, v * a.scale + a.offset)
//!            = v * (sA * sB) + (oA * sB + oB)
//! ```
//!
//! so the relation survives any later change of the base. Slave chains are
//! forbidden: a base may not itself be a slave, and an axis that serves as a
//! base cannot be re-enslaved.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisKind {
    /// Unused slot.
    #[default]
    Free,
    BusyX,
    BusyY,
}

#[derive(Debug, Clone, Default)]
pub struct Axis {
    pub kind: AxisKind,
    pub scale: f64,
    pub offset: f64,
    /// Base axis index when this axis is a slave; `scale`/`offset` then hold
    /// the relation, not an independent transform.
    pub slave: Option<usize>,
    pub label: String,
    /// Compact tick numbering.
    pub compact: bool,
    /// Allow factoring an engineering exponent out of tick numbers.
    pub exponent: bool,
    /// Keep the manual scale through data changes (no auto-rescale).
    pub lock_scale: bool,
}

impl Axis {
    pub fn fresh(kind: AxisKind) -> Self {
        Self {
            kind,
            scale: 1.0,
            offset: 0.0,
            ..Self::default()
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind == AxisKind::Free
    }
}

/// Effective `(scale, offset)` of axis `a`, composing a slave relation on
/// top of its base.
pub fn composed(axes: &[Axis], a: usize) -> (f64, f64) {
    let ax = &axes[a];
    match ax.slave {
        Some(b) => {
            let base = &axes[b];
            (ax.scale * base.scale, ax.offset * base.scale + base.offset)
        }
        None => (ax.scale, ax.offset),
    }
}

/// Normalized viewport coordinate of value `v` on axis `a`.
pub fn conv(axes: &[Axis], a: usize, v: f64) -> f64 {
    let (s, o) = composed(axes, a);
    v * s + o
}

/// Set an independent transform mapping `[min, max]` onto `[0, 1]`.
/// Degenerate spans are widened; reversed or non-finite spans are rejected.
pub fn scale_manual(axes: &mut [Axis], a: usize, mut min: f64, mut max: f64) -> bool {
    if !min.is_finite() || !max.is_finite() || max < min {
        warn!(target: "model.axis", a, min, max, "manual scale span rejected");
        return false;
    }
    if min == max {
        min -= 0.5;
        max += 0.5;
    }
    let ax = &mut axes[a];
    ax.scale = 1.0 / (max - min);
    ax.offset = -min / (max - min);
    true
}

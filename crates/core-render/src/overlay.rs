//! Overlays composed on top of the sketched figures: legend, data box and
//! sample marks.
//!
//! Overlays are repainted every frame through the canvas primitives; they
//! carry no sketch state. The data box doubles as the slice-tracking
//! readout: the input layer feeds cursor positions into
//! [`DataBox::track_slice`] and the box renders the selected row (or the
//! delta against an anchored row in range mode).

use core_derive::DeriveOp;
use core_model::PlotModel;
use core_store::limits::COL_ROW_ID;
use core_surface::{COLOR_TEXT, PixPoint, Rasterizer, TextRenderer, series_color};
use tracing::warn;

/// Swatch segment width in the legend, pixels.
const SWATCH_PX: f64 = 16.0;
/// Padding inside overlay boxes, pixels.
const PAD_PX: f64 = 4.0;

/// Legend rows: `(figure index, label)` for every live figure, paint order.
pub fn legend_rows(model: &PlotModel) -> Vec<(usize, String)> {
    model
        .figures()
        .iter()
        .enumerate()
        .filter_map(|(f, fig)| {
            fig.as_ref().map(|fig| {
                let tag = if fig.hidden { " (hidden)" } else { "" };
                (f, format!("{}{}", fig.label, tag))
            })
        })
        .collect()
}

/// Paint the legend box at the viewport's top-right corner.
pub fn draw_legend(model: &PlotModel, rast: &mut dyn Rasterizer, text: &mut dyn TextRenderer) {
    let rows = legend_rows(model);
    if rows.is_empty() {
        return;
    }
    let vp = model.layout().viewport;
    let line_h = text.height().max(1) as f64;
    let widest = rows
        .iter()
        .map(|(_, label)| text.size_utf8(label).0 as f64)
        .fold(0.0, f64::max);
    let x0 = vp.x1 - widest - SWATCH_PX - 3.0 * PAD_PX;
    let mut y = vp.y0 + PAD_PX;
    for (f, label) in &rows {
        let mid = y + line_h / 2.0;
        rast.canvas_line(
            PixPoint::new(x0 + PAD_PX, mid),
            PixPoint::new(x0 + PAD_PX + SWATCH_PX, mid),
            series_color(*f),
            2.0,
        );
        text.draw_text(
            (x0 + 2.0 * PAD_PX + SWATCH_PX) as i32,
            y as i32,
            label,
            COLOR_TEXT,
        );
        y += line_h;
    }
}

/// Figure index under a click at `(x, y)`, using the same geometry as
/// [`draw_legend`].
pub fn legend_hit(
    model: &PlotModel,
    text: &dyn TextRenderer,
    x: f64,
    y: f64,
) -> Option<usize> {
    let rows = legend_rows(model);
    if rows.is_empty() {
        return None;
    }
    let vp = model.layout().viewport;
    let line_h = text.height().max(1) as f64;
    let widest = rows
        .iter()
        .map(|(_, label)| text.size_utf8(label).0 as f64)
        .fold(0.0, f64::max);
    let x0 = vp.x1 - widest - SWATCH_PX - 3.0 * PAD_PX;
    if x < x0 || x >= vp.x1 {
        return None;
    }
    let row = ((y - (vp.y0 + PAD_PX)) / line_h).floor();
    if row < 0.0 {
        return None;
    }
    rows.get(row as usize).map(|(f, _)| *f)
}

/// What the data box displays.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DataBoxMode {
    #[default]
    Free,
    Slice {
        figure: usize,
        id: u64,
        /// Anchored row for range (delta) readout.
        anchor: Option<u64>,
    },
    Polyfit {
        figure: usize,
    },
}

#[derive(Debug, Default)]
pub struct DataBox {
    pub mode: DataBoxMode,
}

impl DataBox {
    pub fn free(&mut self) {
        self.mode = DataBoxMode::Free;
    }

    /// Track the row of figure `f` nearest the normalized viewport X
    /// position `x_norm`. Keeps any anchor across motion.
    pub fn track_slice(&mut self, model: &mut PlotModel, f: usize, x_norm: f64) -> bool {
        let Some(fig) = model.figure(f).cloned() else {
            warn!(target: "render.overlay", f, "slice track on unknown figure");
            return false;
        };
        let (sx, ox) = model.composed(fig.axis_x);
        if sx == 0.0 || !sx.is_finite() {
            return false;
        }
        let v = (x_norm - ox) / sx;
        let Some(hit) = model.store_mut().slice_get(fig.dataset, fig.col_x, v) else {
            return false;
        };
        let anchor = match self.mode {
            DataBoxMode::Slice {
                figure, anchor, ..
            } if figure == f => anchor,
            _ => None,
        };
        self.mode = DataBoxMode::Slice {
            figure: f,
            id: hit.id,
            anchor,
        };
        true
    }

    /// Anchor the current slice row; subsequent readouts show deltas.
    pub fn anchor_range(&mut self) {
        if let DataBoxMode::Slice { figure, id, .. } = self.mode {
            self.mode = DataBoxMode::Slice {
                figure,
                id,
                anchor: Some(id),
            };
        }
    }

    pub fn show_polyfit(&mut self, figure: usize) {
        self.mode = DataBoxMode::Polyfit { figure };
    }

    /// Readout lines for the current mode.
    pub fn lines(&self, model: &mut PlotModel, precision: usize) -> Vec<String> {
        match self.mode {
            DataBoxMode::Free => Vec::new(),
            DataBoxMode::Slice { figure, id, anchor } => {
                let Some(fig) = model.figure(figure).cloned() else {
                    return Vec::new();
                };
                let Some(row) = model.store_mut().row_at(fig.dataset, id) else {
                    return Vec::new();
                };
                let val = |c: i32| {
                    if c == COL_ROW_ID {
                        id as f64
                    } else {
                        row[c as usize]
                    }
                };
                let (x, y) = (val(fig.col_x), val(fig.col_y));
                match anchor.and_then(|a| model.store_mut().row_at(fig.dataset, a).map(|r| (a, r)))
                {
                    Some((aid, arow)) => {
                        let aval = |c: i32| {
                            if c == COL_ROW_ID {
                                aid as f64
                            } else {
                                arow[c as usize]
                            }
                        };
                        vec![
                            format!("dx {}", fmt(x - aval(fig.col_x), precision)),
                            format!("dy {}", fmt(y - aval(fig.col_y), precision)),
                        ]
                    }
                    None => vec![
                        format!("x {}", fmt(x, precision)),
                        format!("y {}", fmt(y, precision)),
                    ],
                }
            }
            DataBoxMode::Polyfit { figure } => {
                let Some(fig) = model.figure(figure) else {
                    return Vec::new();
                };
                let Some(column_n) = model
                    .store()
                    .dataset(fig.dataset)
                    .map(|ds| ds.column_n() as i32)
                else {
                    return Vec::new();
                };
                if fig.col_y < column_n {
                    return Vec::new();
                }
                let s = (fig.col_y - column_n) as usize;
                match model.derive().op(fig.dataset, s) {
                    Some(DeriveOp::Polyfit {
                        coeffs, std_dev, ..
                    }) => {
                        let mut out: Vec<String> = coeffs
                            .iter()
                            .enumerate()
                            .map(|(i, c)| format!("b{i} {}", fmt(*c, precision)))
                            .collect();
                        out.push(format!("sd {}", fmt(*std_dev, precision)));
                        out
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    /// Paint the box at the viewport's top-left corner.
    pub fn draw(
        &self,
        model: &mut PlotModel,
        text: &mut dyn TextRenderer,
        precision: usize,
    ) {
        let lines = self.lines(model, precision);
        if lines.is_empty() {
            return;
        }
        let vp = model.layout().viewport;
        let line_h = text.height().max(1) as f64;
        let mut y = vp.y0 + PAD_PX;
        for line in &lines {
            text.draw_text((vp.x0 + PAD_PX) as i32, y as i32, line, COLOR_TEXT);
            y += line_h;
        }
    }
}

/// Value formatting with a significant-digit budget; falls back to
/// scientific notation away from unity scale.
pub fn fmt(v: f64, precision: usize) -> String {
    if !v.is_finite() {
        return format!("{v}");
    }
    let a = v.abs();
    if a != 0.0 && !(1e-4..1e9).contains(&a) {
        format!("{v:.precision$e}")
    } else {
        let s = format!("{v:.precision$}");
        // Trim trailing zeroes but keep one decimal.
        match s.find('.') {
            Some(_) => {
                let t = s.trim_end_matches('0');
                let t = t.strip_suffix('.').unwrap_or(t);
                t.to_string()
            }
            None => s,
        }
    }
}

/// Marker budget per figure: the total across figures approximates
/// `viewport width / mark width`, shrinking per-figure as figures multiply.
pub fn mark_count(viewport_w: f64, mark_px: u32, fig_n: usize) -> usize {
    if mark_px == 0 || fig_n == 0 || viewport_w <= 0.0 {
        return 0;
    }
    (viewport_w / (mark_px as f64 * (fig_n as f64).sqrt())).floor() as usize
}

/// Place sample markers on every visible figure, evenly spaced in
/// normalized X. Each marker snaps to the figure's nearest stored row via
/// the slice query.
pub fn draw_marks(model: &mut PlotModel, rast: &mut dyn Rasterizer) {
    let layout = model.layout().clone();
    let vp = layout.viewport;
    let fig_n = model.figures().iter().flatten().filter(|f| !f.hidden).count();
    let n = mark_count(vp.width(), layout.mark_px, fig_n);
    if n == 0 {
        return;
    }
    let figs: Vec<usize> = model
        .figures()
        .iter()
        .enumerate()
        .filter_map(|(f, fig)| {
            fig.as_ref()
                .filter(|fig| !fig.hidden)
                .map(|_| f)
        })
        .collect();
    for f in figs {
        let fig = model.figure(f).expect("collected above").clone();
        let (sx, ox) = model.composed(fig.axis_x);
        let (sy, oy) = model.composed(fig.axis_y);
        if sx == 0.0 || !sx.is_finite() {
            continue;
        }
        for j in 0..n {
            let x_norm = (j as f64 + 0.5) / n as f64;
            let v = (x_norm - ox) / sx;
            let Some(hit) = model.store_mut().slice_get(fig.dataset, fig.col_x, v) else {
                break;
            };
            let Some(row) = model.store_mut().row_at(fig.dataset, hit.id) else {
                continue;
            };
            let val = |c: i32| {
                if c == COL_ROW_ID {
                    hit.id as f64
                } else {
                    row[c as usize]
                }
            };
            let (x, y) = (val(fig.col_x), val(fig.col_y));
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            let p = PixPoint::new(layout.px_x(x * sx + ox), layout.px_y(y * sy + oy));
            if vp.inflated(layout.mark_px as f64).contains(p) {
                rast.canvas_dot(p, layout.mark_px as f64, series_color(f));
            }
        }
    }
}

//! Configuration loading and parsing.
//!
//! Parses `waveview.toml` (or an override path provided by the binary) into
//! structured option groups: `[layout]` (mark width, axis boxes, legend),
//! `[default]` (dataset geometry, chunk compression, drawing width),
//! `[render]` (frame budget, sketch pool), `[format]` (value precision) and
//! the top-level `transparency` switch. Unknown fields are ignored (TOML
//! deserialization tolerance) so the file format can evolve without
//! immediate warnings; a file that fails to parse falls back to defaults.
//!
//! Raw values are kept as parsed; [`Config::apply_context`] clamps the ones
//! that depend on the live viewport and logs when it does, so a later
//! resize can re-clamp from the raw values.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct LayoutConfig {
    /// Sample mark width in pixels.
    #[serde(default = "LayoutConfig::default_mark_px")]
    pub mark_px: u32,
    /// Width of one axis box (ticks plus numbers) in pixels.
    #[serde(default = "LayoutConfig::default_axis_box_px")]
    pub axis_box_px: u32,
    /// Width of an axis label box in pixels.
    #[serde(default = "LayoutConfig::default_label_box_px")]
    pub label_box_px: u32,
    /// Draw the legend box.
    #[serde(default = "LayoutConfig::default_legend")]
    pub legend: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mark_px: Self::default_mark_px(),
            axis_box_px: Self::default_axis_box_px(),
            label_box_px: Self::default_label_box_px(),
            legend: Self::default_legend(),
        }
    }
}

impl LayoutConfig {
    const fn default_mark_px() -> u32 {
        10
    }
    const fn default_axis_box_px() -> u32 {
        46
    }
    const fn default_label_box_px() -> u32 {
        16
    }
    const fn default_legend() -> bool {
        true
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DefaultConfig {
    /// Ring capacity (rows) for datasets created without an explicit length.
    #[serde(default = "DefaultConfig::default_length")]
    pub length: usize,
    /// LZ4-compress dataset chunks.
    #[serde(default)]
    pub compress: bool,
    /// Line width for new figures, in pixels.
    #[serde(default = "DefaultConfig::default_width")]
    pub width: u32,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            length: Self::default_length(),
            compress: false,
            width: Self::default_width(),
        }
    }
}

impl DefaultConfig {
    const fn default_length() -> usize {
        1 << 20
    }
    const fn default_width() -> u32 {
        2
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Progressive-draw frame budget in milliseconds.
    #[serde(default = "RenderConfig::default_budget_ms")]
    pub budget_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            budget_ms: Self::default_budget_ms(),
        }
    }
}

impl RenderConfig {
    const fn default_budget_ms() -> u64 {
        20
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormatConfig {
    /// Significant digits in data-box value formatting.
    #[serde(default = "FormatConfig::default_precision")]
    pub precision: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            precision: Self::default_precision(),
        }
    }
}

impl FormatConfig {
    const fn default_precision() -> usize {
        9
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub default: DefaultConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub format: FormatConfig,
    /// Blend overlay boxes instead of painting them opaque.
    #[serde(default)]
    pub transparency: bool,
}

/// Viewport geometry the raw values are clamped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigContext {
    pub viewport_w: u32,
    pub viewport_h: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Original file string, when one was read.
    pub raw: Option<String>,
    /// Parsed (or default) data.
    pub file: ConfigFile,
    /// Mark width clamped to the viewport; recomputed on resize.
    pub effective_mark_px: u32,
}

/// Best-effort config path: working directory first, then the platform
/// config dir (XDG / AppData Roaming).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("waveview.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("waveview").join("waveview.toml");
    }
    PathBuf::from("waveview.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Config {
                raw: Some(content),
                file,
                effective_mark_px: 0, // computed later
            }),
            Err(_e) => Ok(Config::default()),
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    /// Clamp viewport-dependent values. A mark wider than a tenth of the
    /// viewport degrades layout badly enough to cap.
    pub fn apply_context(&mut self, ctx: ConfigContext) -> u32 {
        let raw = self.file.layout.mark_px;
        let max = (ctx.viewport_w.min(ctx.viewport_h) / 10).max(1);
        let clamped = raw.min(max);
        if clamped != raw {
            info!(
                target: "config",
                raw,
                clamped,
                max,
                viewport_w = ctx.viewport_w,
                viewport_h = ctx.viewport_h,
                "layout_mark_px_clamped"
            );
        }
        self.effective_mark_px = clamped;
        clamped
    }

    /// Re-clamp after a viewport change. `Some(new)` when the effective
    /// value moved.
    pub fn recompute_with_context(&mut self, ctx: ConfigContext) -> Option<u32> {
        let prev = self.effective_mark_px;
        let current = self.apply_context(ctx);
        if current != prev { Some(current) } else { None }
    }
}

//! Interfaces of the engine's external collaborators.
//!
//! The plotting core does not rasterize, shape text, solve least squares, or
//! read clocks itself; it drives those through the traits in this crate. A
//! windowing frontend supplies real implementations; tests and the demo
//! binary supply headless ones. Keeping the traits in a leaf crate mirrors
//! how the terminal backend is isolated from the render engine elsewhere in
//! this workspace's lineage: the engine depends on capabilities, never on a
//! concrete device.

pub mod clock;
pub mod raster;
pub mod scheme;
pub mod solve;
pub mod text;

pub use clock::{Clock, SystemClock};
pub use raster::{PixPoint, PixRect, Rasterizer};
pub use scheme::{COLOR_BACKGROUND, COLOR_MUTED, COLOR_TEXT, ColorIx, series_color};
pub use solve::LeastSquares;
pub use text::TextRenderer;

//! Column groups: user-defined labels and hints shared by columns.
//!
//! A group carries a display label, a time-unwrap hint (the column holds a
//! wrapping clock and plots should unwrap it), and an optional default scale
//! applied when an axis first binds a column of the group. Datasets assign
//! groups per public column, including the synthetic row-id column.

/// A user-defined column group.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub label: String,
    /// Columns of this group hold a wrapping time base.
    pub unwrap_time: bool,
    /// `(min, max)` scale applied when an axis auto-binds the group.
    pub default_scale: Option<(f64, f64)>,
}

impl Group {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unwrap_time: false,
            default_scale: None,
        }
    }
}

use serde::{Deserialize, Serialize};

/// A positioned, styled text field bound to a row column by name.
///
/// The set of placements is laid out once in the editor and shared read-only
/// across every row of a generation job. Coordinates are absolute pixels in
/// the template's intrinsic canvas, origin at the top-left corner; the
/// renderer performs whatever axis flip its output format needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldPlacement {
    /// The row column this field draws its text from.
    pub field_name: String,
    /// Horizontal offset from the canvas's left edge, in pixels.
    pub x: f32,
    /// Vertical offset from the canvas's top edge, in pixels.
    pub y: f32,
    /// Text size in pixels (rendered 1px = 1pt).
    pub font_size_px: f32,
    /// Fill color as six hex digits, e.g. `1a2b3c`. Defaults to black.
    #[serde(default = "default_color")]
    pub color_hex: String,
    /// Whether the bold face is used for this field.
    #[serde(default)]
    pub bold: bool,
}

fn default_color() -> String {
    "000000".to_string()
}

impl FieldPlacement {
    /// Parses `color_hex` into RGB components.
    pub fn color_rgb(&self) -> Option<(u8, u8, u8)> {
        let hex = self.color_hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some((r, g, b))
    }
}

// src/theme.rs
//! Caller-supplied visual parameters, applied uniformly to charts and slides.
//!
//! Every key is optional; unset keys fall back to the documented defaults and
//! unrecognized keys are ignored (serde skips them).

use serde::{Deserialize, Serialize};

pub const DEFAULT_BRAND_PRIMARY: &str = "#38BDF8";
pub const DEFAULT_BRAND_SECONDARY: &str = "#818CF8";
pub const DEFAULT_ACCENT_COLOR: &str = "#F472B6";
pub const DEFAULT_TEXT_COLOR: &str = "#F0F0F0";
pub const DEFAULT_BACKGROUND_COLOR: &str = "#121212";
pub const DEFAULT_FONT_FAMILY: &str = "Arial";
pub const DEFAULT_CORNER_RADIUS: u32 = 40;

fn default_brand_primary() -> String {
    DEFAULT_BRAND_PRIMARY.to_string()
}
fn default_brand_secondary() -> String {
    DEFAULT_BRAND_SECONDARY.to_string()
}
fn default_accent_color() -> String {
    DEFAULT_ACCENT_COLOR.to_string()
}
fn default_text_color() -> String {
    DEFAULT_TEXT_COLOR.to_string()
}
fn default_background_color() -> String {
    DEFAULT_BACKGROUND_COLOR.to_string()
}
fn default_font_family() -> String {
    DEFAULT_FONT_FAMILY.to_string()
}
fn default_corner_radius() -> u32 {
    DEFAULT_CORNER_RADIUS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_brand_primary")]
    pub brand_primary: String,
    #[serde(default = "default_brand_secondary")]
    pub brand_secondary: String,
    #[serde(default = "default_accent_color")]
    pub accent_color: String,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_corner_radius")]
    pub corner_radius: u32,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(Default::default()))
            .expect("theme defaults")
    }
}

impl ThemeConfig {
    /// Parse a caller-supplied theme object. Unknown keys are dropped, bad
    /// values fall back to defaults rather than failing the request.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    /// Relative luminance check; decides card/text contrast on both renderers.
    pub fn has_dark_background(&self) -> bool {
        is_dark_color(&self.background_color)
    }

    /// Black-or-white text that stays readable on the configured background.
    pub fn contrast_text_color(&self) -> &'static str {
        if self.has_dark_background() {
            "#FFFFFF"
        } else {
            "#141414"
        }
    }
}

fn parse_hex_channel(hex: &str, idx: usize) -> u32 {
    u32::from_str_radix(hex.get(idx..idx + 2).unwrap_or("00"), 16).unwrap_or(0)
}

/// True when the hex color's luminance lands below mid-gray.
pub fn is_dark_color(hex_color: &str) -> bool {
    let hex = hex_color.trim_start_matches('#');
    if hex.len() < 6 {
        return true;
    }
    let r = parse_hex_channel(hex, 0) as f32;
    let g = parse_hex_channel(hex, 2) as f32;
    let b = parse_hex_channel(hex, 4) as f32;
    let luminance = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    luminance < 128.0
}

//! Engine Settings
//!
//! Preferences shared by every tree handled by a scheduler. They are read
//! from JSON; missing keys fall back to their defaults.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// An RGB color with channels in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color(pub [f32; 3]);

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self([r, g, b])
    }

    /// Linear blend towards `other`; `t` is clamped to `0.0..=1.0`.
    pub fn lerp(self, other: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        let [r0, g0, b0] = self.0;
        let [r1, g1, b1] = other.0;
        let s = 1.0 - t;
        Color([r0 * s + r1 * t, g0 * s + g1 * t, b0 * s + b1 * t])
    }
}

/// When the host should run frame-change updates relative to its own frame
/// handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameChangeMode {
    Pre,
    #[default]
    Post,
    /// Frame changes never trigger updates.
    None,
}

/// Engine-wide preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log every node's execution time.
    pub log_timings: bool,
    /// Color of nodes that could not get their input data.
    pub no_data_color: Color,
    /// Color of nodes whose computation failed.
    pub exception_color: Color,
    /// Color successful nodes by their execution time.
    pub heat_map: bool,
    pub heat_map_hot: Color,
    pub heat_map_cold: Color,
    pub frame_change_mode: FrameChangeMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_timings: false,
            no_data_color: Color::rgb(1.0, 0.3, 0.0),
            exception_color: Color::rgb(0.8, 0.0, 0.0),
            heat_map: false,
            heat_map_hot: Color::rgb(0.8, 0.0, 0.0),
            heat_map_cold: Color::rgb(1.0, 1.0, 1.0),
            frame_change_mode: FrameChangeMode::Post,
        }
    }
}

impl Settings {
    /// Parse settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Whether frame changes should trigger updates at all.
    pub fn reacts_to_frames(&self) -> bool {
        self.frame_change_mode != FrameChangeMode::None
    }
}

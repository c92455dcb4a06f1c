use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{CanvasSize, Color, RenderMode, Result, VisualiserError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub canvas: CanvasConfig,
    pub visual: VisualConfig,
}

impl AppConfig {
    /// Loads configuration from a JSON file. Missing fields fall back to
    /// their defaults so a file only has to spell out the overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| VisualiserError::msg(format!("invalid config {}: {err}", path.display())))
    }

    /// Checks the cross-field constraints the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(VisualiserError::InvalidInput("sample rate must be positive"));
        }
        if !self.audio.chunk_size.is_power_of_two() {
            // The spectrum mode feeds whole frames to the radix-2 transform.
            return Err(VisualiserError::InvalidInput(
                "chunk size must be a power of two",
            ));
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(VisualiserError::InvalidInput(
                "canvas dimensions must be positive",
            ));
        }
        Ok(())
    }

    pub fn canvas_size(&self) -> CanvasSize {
        CanvasSize::new(self.canvas.width as f32, self.canvas.height as f32)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per captured frame. One frame is the unit of pass-through
    /// playback and of rendering.
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            chunk_size: 1024,
        }
    }
}

/// Initial window dimensions in pixels, also used as the virtual canvas for
/// headless primitive dumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 400,
        }
    }
}

/// Initial visual selection; both fields can be changed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub mode: RenderMode,
    pub bar_color: Color,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::AverageHorizontal,
            bar_color: Color::WHITE,
        }
    }
}

//! The selectable render modes.
//!
//! Every mode is a pure layout function from one audio frame plus the
//! current canvas size and colour to a batch of draw primitives. Modes hold
//! no cross-frame state, so switching between them is just a matter of which
//! function runs for the next frame.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{signal, AudioFrame, CanvasSize, Color, DrawPrimitive, Result, VisualiserError};

/// Width of one bar in the dense layouts.
const BAR_WIDTH: f32 = 3.0;
/// Width of one bar in the MFCC layout.
const MFCC_BAR_WIDTH: f32 = 20.0;
/// Bar slots held back so the outermost bars never clip the window edge.
const EDGE_SLOTS: usize = 5;
/// Raw sample units per pixel of bar height.
const HEIGHT_DIVISOR: f32 = 75.0;
/// Mean spectrum magnitude units per pixel of bar height.
const SPECTRUM_DIVISOR: f32 = 1000.0;
/// Gap between the spectrum baseline and the bottom edge.
const SPECTRUM_BASELINE_INSET: f32 = 10.0;
/// Gap between the bar ring and the nearest canvas edge.
const CIRCLE_MARGIN: f32 = 40.0;
/// Summed coefficient units per pixel of MFCC bar height.
const MFCC_HEIGHT_DIVISOR: f32 = 3.0;

/// The available visualisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    AverageHorizontal,
    FilteredHorizontal,
    FftHorizontal,
    FilteredVerticalCircle,
    FilteredVerticalInnerCircle,
    FilteredRotatedCircle,
    Mfcc,
}

impl RenderMode {
    pub const ALL: [RenderMode; 7] = [
        RenderMode::AverageHorizontal,
        RenderMode::FilteredHorizontal,
        RenderMode::FftHorizontal,
        RenderMode::FilteredVerticalCircle,
        RenderMode::FilteredVerticalInnerCircle,
        RenderMode::FilteredRotatedCircle,
        RenderMode::Mfcc,
    ];

    /// Stable identifier used on the command line and in config files.
    pub fn id(self) -> &'static str {
        match self {
            Self::AverageHorizontal => "average-horizontal",
            Self::FilteredHorizontal => "filtered-horizontal",
            Self::FftHorizontal => "fft-horizontal",
            Self::FilteredVerticalCircle => "filtered-vertical-circle",
            Self::FilteredVerticalInnerCircle => "filtered-vertical-inner-circle",
            Self::FilteredRotatedCircle => "filtered-rotated-circle",
            Self::Mfcc => "mfcc",
        }
    }

    /// Human-readable name shown in the mode menu.
    pub fn label(self) -> &'static str {
        match self {
            Self::AverageHorizontal => "Average Horizontal",
            Self::FilteredHorizontal => "Filtered Horizontal",
            Self::FftHorizontal => "FFT Horizontal",
            Self::FilteredVerticalCircle => "Filtered Vertical Circle",
            Self::FilteredVerticalInnerCircle => "Filtered Vertical Inner Circle",
            Self::FilteredRotatedCircle => "Filtered Rotated Circle",
            Self::Mfcc => "Mel-Frequency Cepstral Coefficients",
        }
    }

    /// Lays out one frame as draw primitives for the given canvas.
    pub fn render(
        self,
        frame: &AudioFrame,
        canvas: CanvasSize,
        color: Color,
    ) -> Result<Vec<DrawPrimitive>> {
        match self {
            Self::AverageHorizontal => average_horizontal(frame, canvas, color),
            Self::FilteredHorizontal => filtered_horizontal(frame, canvas, color),
            Self::FftHorizontal => fft_horizontal(frame, canvas, color),
            Self::FilteredVerticalCircle => filtered_vertical_circle(frame, canvas, color),
            Self::FilteredVerticalInnerCircle => filtered_vertical_inner_circle(frame, canvas, color),
            Self::FilteredRotatedCircle => filtered_rotated_circle(frame, canvas, color),
            Self::Mfcc => mfcc_bars(frame, canvas, color),
        }
    }
}

impl Default for RenderMode {
    fn default() -> Self {
        Self::AverageHorizontal
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for RenderMode {
    type Err = VisualiserError;

    /// Accepts either the identifier or the menu label, case-insensitively.
    fn from_str(text: &str) -> Result<Self> {
        let needle = text.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.id() == needle || mode.label().to_lowercase() == needle)
            .ok_or_else(|| VisualiserError::msg(format!("unknown render mode {text:?}")))
    }
}

// Whole bar slots across the canvas, less the edge margin.
fn bar_count(canvas: CanvasSize) -> usize {
    ((canvas.width / BAR_WIDTH) as usize).saturating_sub(EDGE_SLOTS)
}

fn left_edge(canvas: CanvasSize, bars: usize) -> f32 {
    canvas.width / 2.0 - bars as f32 * BAR_WIDTH / 2.0
}

fn bar_height(level: f32) -> f32 {
    (level.abs() / HEIGHT_DIVISOR).floor()
}

// Decimates the frame so roughly one sample survives per bar, then keeps
// the first `bars` of them.
fn filtered_levels(frame: &AudioFrame, bars: usize) -> Result<Vec<f32>> {
    if bars == 0 {
        return Ok(Vec::new());
    }

    let samples = frame.to_f32();
    let factor = samples.len() / bars;
    if factor == 0 {
        return Err(VisualiserError::InvalidInput(
            "frame holds fewer samples than the bar layout needs",
        ));
    }

    let mut levels = signal::downsample_filtered(&samples, factor)?;
    levels.truncate(bars);
    Ok(levels)
}

// Bars rising from the vertical midline, packed around the horizontal
// centre of the canvas.
fn horizontal_bars(levels: &[f32], canvas: CanvasSize, color: Color) -> Vec<DrawPrimitive> {
    let left = left_edge(canvas, levels.len());
    let baseline = canvas.height / 2.0;

    levels
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let height = bar_height(level);
            let x = left + i as f32 * BAR_WIDTH;
            DrawPrimitive::rect(x, baseline, x + BAR_WIDTH, baseline - height, color)
        })
        .collect()
}

fn average_horizontal(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let levels = signal::downsample_mean(&frame.to_f32(), bar_count(canvas));
    Ok(horizontal_bars(&levels, canvas, color))
}

fn filtered_horizontal(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let levels = filtered_levels(frame, bar_count(canvas))?;
    Ok(horizontal_bars(&levels, canvas, color))
}

// Spectrum bars rising from a baseline near the bottom edge. Each bar
// averages the magnitudes of a contiguous slice of FFT bins, mirrored upper
// half included.
fn fft_horizontal(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let bars = bar_count(canvas);
    if bars == 0 {
        return Ok(Vec::new());
    }

    let samples = frame.to_f32();
    let segment_len = samples.len() / bars;
    if segment_len == 0 {
        return Err(VisualiserError::InvalidInput(
            "frame holds fewer samples than the bar layout needs",
        ));
    }
    let spectrum = signal::fft(&samples)?;

    let left = left_edge(canvas, bars);
    let baseline = canvas.height - SPECTRUM_BASELINE_INSET;
    let primitives = (0..bars)
        .map(|i| {
            let start = i * segment_len;
            let magnitude_sum: f32 = spectrum[start..start + segment_len]
                .iter()
                .map(|bin| bin.norm())
                .sum();
            let height = (magnitude_sum / segment_len as f32 / SPECTRUM_DIVISOR).floor();
            let x = left + i as f32 * BAR_WIDTH;
            DrawPrimitive::rect(x, baseline, x + BAR_WIDTH, baseline - height, color)
        })
        .collect();
    Ok(primitives)
}

fn circle_geometry(canvas: CanvasSize) -> (f32, f32, f32) {
    let (cx, cy) = canvas.center();
    let radius = cx.min(cy) - CIRCLE_MARGIN;
    (cx, cy, radius)
}

// Upright bars whose centres sit on a ring around the canvas centre.
fn filtered_vertical_circle(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let levels = filtered_levels(frame, bar_count(canvas))?;
    let (cx, cy, radius) = circle_geometry(canvas);

    let bars = levels.len();
    let primitives = levels
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let height = bar_height(level);
            let angle = std::f32::consts::TAU * i as f32 / bars as f32;
            let x = cx + radius * angle.cos() - BAR_WIDTH / 2.0;
            let y = cy + radius * angle.sin() - height / 2.0;
            DrawPrimitive::rect(x, y, x + BAR_WIDTH, y + height, color)
        })
        .collect();
    Ok(primitives)
}

// As the vertical circle, but each bar is nudged along the line towards the
// canvas centre by half its own extent, pulling tall bars inside the ring.
fn filtered_vertical_inner_circle(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let levels = filtered_levels(frame, bar_count(canvas))?;
    let (cx, cy, radius) = circle_geometry(canvas);

    let bars = levels.len();
    let primitives = levels
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let height = bar_height(level);
            let angle = std::f32::consts::TAU * i as f32 / bars as f32;
            let x = cx + radius * angle.cos() - BAR_WIDTH / 2.0;
            let y = cy + radius * angle.sin() - height / 2.0;
            let to_center = (cy - y).atan2(cx - x);
            let x = x + BAR_WIDTH / 2.0 * to_center.cos();
            let y = y + height / 2.0 * to_center.sin();
            DrawPrimitive::rect(x, y, x + BAR_WIDTH, y + height, color)
        })
        .collect();
    Ok(primitives)
}

// Bars standing on the ring, each rotated about its own centre to face the
// canvas centre. Rotation breaks the axis alignment, so these come out as
// polygons.
fn filtered_rotated_circle(
    frame: &AudioFrame,
    canvas: CanvasSize,
    color: Color,
) -> Result<Vec<DrawPrimitive>> {
    let levels = filtered_levels(frame, bar_count(canvas))?;
    let (cx, cy, radius) = circle_geometry(canvas);

    let bars = levels.len();
    let primitives = levels
        .iter()
        .enumerate()
        .map(|(i, &level)| {
            let height = bar_height(level);
            let angle = std::f32::consts::TAU * i as f32 / bars as f32;
            let x = cx + radius * angle.cos() - BAR_WIDTH / 2.0;
            let y = cy + radius * angle.sin() - height;
            let to_center = (cy - y).atan2(cx - x);
            DrawPrimitive::polygon(rotated_rect_points(x, y, BAR_WIDTH, height, to_center), color)
        })
        .collect();
    Ok(primitives)
}

// Rotates the rectangle's corners about its centre.
fn rotated_rect_points(x: f32, y: f32, width: f32, height: f32, angle: f32) -> Vec<[f32; 2]> {
    let cx = x + width / 2.0;
    let cy = y + height / 2.0;
    let (sin, cos) = angle.sin_cos();

    [
        [x, y],
        [x + width, y],
        [x + width, y + height],
        [x, y + height],
    ]
    .iter()
    .map(|&[px, py]| {
        let dx = px - cx;
        let dy = py - cy;
        [cx + dx * cos - dy * sin, cy + dx * sin + dy * cos]
    })
    .collect()
}

// One bar per cepstral coefficient, extending downwards from the midline
// for positive sums. The bar count depends only on the canvas width, so the
// layout stays put while the audio changes.
fn mfcc_bars(frame: &AudioFrame, canvas: CanvasSize, color: Color) -> Result<Vec<DrawPrimitive>> {
    let slots = (canvas.width / MFCC_BAR_WIDTH) as usize;
    let coefficient_count = slots.saturating_sub(1);
    if coefficient_count == 0 {
        return Ok(Vec::new());
    }

    let trajectories = signal::mfcc(&frame.to_f32(), frame.sample_rate(), coefficient_count)?;
    let baseline = canvas.height / 2.0;
    let primitives = trajectories
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let height = row.iter().sum::<f32>() / MFCC_HEIGHT_DIVISOR;
            let x = MFCC_BAR_WIDTH / 2.0 + i as f32 * MFCC_BAR_WIDTH;
            DrawPrimitive::rect(x, baseline, x + MFCC_BAR_WIDTH, baseline + height, color)
        })
        .collect();
    Ok(primitives)
}

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{Result, VisualiserError};

/// RGB fill colour for draw primitives.
///
/// Serialises as a `#rrggbb` hex string so configuration files and the JSON
/// dump output read the way colour pickers write them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(0xff, 0xff, 0xff);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses a `#rrggbb` hex string.
    pub fn from_hex(text: &str) -> Result<Self> {
        let digits = text
            .strip_prefix('#')
            .ok_or_else(|| VisualiserError::msg(format!("colour must start with '#': {text:?}")))?;
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(VisualiserError::msg(format!(
                "colour must be #rrggbb: {text:?}"
            )));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| VisualiserError::msg(format!("invalid hex digits in colour {text:?}")))
        };

        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Color::from_hex(&text).map_err(de::Error::custom)
    }
}

/// Canvas dimensions in pixels at the moment a frame is laid out.
///
/// Modes query this fresh for every frame, so a resized surface changes the
/// bar layout on the next frame without any replumbing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: f32,
    pub height: f32,
}

impl CanvasSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width / 2.0, self.height / 2.0)
    }
}

/// A single filled shape produced by a render mode.
///
/// Coordinates follow the usual screen convention: the origin sits at the top
/// left and `y` grows downwards. Rectangle corners are not required to be
/// ordered; consumers normalise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum DrawPrimitive {
    Rect {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        fill: Color,
    },
    Polygon {
        points: Vec<[f32; 2]>,
        fill: Color,
    },
}

impl DrawPrimitive {
    pub fn rect(x1: f32, y1: f32, x2: f32, y2: f32, fill: Color) -> Self {
        Self::Rect { x1, y1, x2, y2, fill }
    }

    pub fn polygon(points: Vec<[f32; 2]>, fill: Color) -> Self {
        Self::Polygon { points, fill }
    }

    pub fn fill(&self) -> Color {
        match self {
            Self::Rect { fill, .. } => *fill,
            Self::Polygon { fill, .. } => *fill,
        }
    }

    /// Returns true when every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Rect { x1, y1, x2, y2, .. } => {
                x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()
            }
            Self::Polygon { points, .. } => points
                .iter()
                .all(|p| p[0].is_finite() && p[1].is_finite()),
        }
    }
}

/// Drawing target for one frame's worth of primitives.
///
/// Implementations own the mapping from abstract pixels to their medium, e.g.
/// the terminal canvas in the application crate. `size` must reflect the
/// current dimensions on every call so layouts track live resizes.
pub trait Surface {
    fn size(&self) -> CanvasSize;

    /// Removes everything drawn for the previous frame.
    fn clear(&mut self);

    fn fill_rect(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, fill: Color);

    fn fill_polygon(&mut self, points: &[[f32; 2]], fill: Color);

    /// Makes the drawn frame visible.
    fn present(&mut self) -> Result<()>;
}

/// Replaces the surface contents with one frame's primitives.
pub fn submit(surface: &mut dyn Surface, primitives: &[DrawPrimitive]) -> Result<()> {
    surface.clear();
    for primitive in primitives {
        match primitive {
            DrawPrimitive::Rect { x1, y1, x2, y2, fill } => {
                surface.fill_rect(*x1, *y1, *x2, *y2, *fill)
            }
            DrawPrimitive::Polygon { points, fill } => surface.fill_polygon(points, *fill),
        }
    }
    surface.present()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colours() {
        let colour = Color::from_hex("#a1b2c3").unwrap();
        assert_eq!(colour, Color::new(0xa1, 0xb2, 0xc3));
        assert_eq!(colour.to_string(), "#a1b2c3");
    }

    #[test]
    fn rejects_malformed_colours() {
        assert!(Color::from_hex("ffffff").is_err());
        assert!(Color::from_hex("#fff").is_err());
        assert!(Color::from_hex("#gggggg").is_err());
    }

    #[test]
    fn colour_serialises_as_hex_string() {
        let json = serde_json::to_string(&Color::new(255, 0, 16)).unwrap();
        assert_eq!(json, "\"#ff0010\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Color::new(255, 0, 16));
    }

    #[test]
    fn finiteness_check_covers_both_shapes() {
        let rect = DrawPrimitive::rect(0.0, 0.0, 1.0, 1.0, Color::WHITE);
        assert!(rect.is_finite());
        let bad = DrawPrimitive::rect(0.0, f32::NAN, 1.0, 1.0, Color::WHITE);
        assert!(!bad.is_finite());
        let polygon =
            DrawPrimitive::polygon(vec![[0.0, 0.0], [1.0, 0.0], [0.5, 1.0]], Color::WHITE);
        assert!(polygon.is_finite());
    }

    #[derive(Default)]
    struct RecordingSurface {
        log: Vec<String>,
    }

    impl Surface for RecordingSurface {
        fn size(&self) -> CanvasSize {
            CanvasSize::new(100.0, 50.0)
        }

        fn clear(&mut self) {
            self.log.push("clear".into());
        }

        fn fill_rect(&mut self, _x1: f32, _y1: f32, _x2: f32, _y2: f32, _fill: Color) {
            self.log.push("rect".into());
        }

        fn fill_polygon(&mut self, points: &[[f32; 2]], _fill: Color) {
            self.log.push(format!("polygon:{}", points.len()));
        }

        fn present(&mut self) -> Result<()> {
            self.log.push("present".into());
            Ok(())
        }
    }

    #[test]
    fn submit_clears_before_drawing_and_presents_after() {
        let mut surface = RecordingSurface::default();
        let primitives = vec![
            DrawPrimitive::rect(0.0, 0.0, 3.0, 10.0, Color::WHITE),
            DrawPrimitive::polygon(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]], Color::WHITE),
        ];

        submit(&mut surface, &primitives).unwrap();
        assert_eq!(surface.log, vec!["clear", "rect", "polygon:4", "present"]);
    }
}

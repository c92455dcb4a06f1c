//! Terminal raster canvas.
//!
//! Each character cell shows two vertically stacked pixels through the upper
//! half block glyph: the foreground colour paints the top pixel and the
//! background colour the bottom one. That doubles the vertical resolution,
//! which the bar layouts need on squat terminal grids.

use std::io::{self, Stdout, Write};

use audio_visualiser_core::{CanvasSize, Color, Result, Surface};
use crossterm::{
    cursor, execute, queue,
    style::{self, Color as TermColor},
    terminal,
};

const BACKGROUND: Color = Color::new(0, 0, 0);
const HALF_BLOCK: char = '\u{2580}';

/// Off-screen pixel buffer with the fill routines.
struct PixelGrid {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
}

impl PixelGrid {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![BACKGROUND; width * height],
        }
    }

    /// Blanks the buffer, adopting new dimensions if the terminal resized.
    fn reset(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width * height, BACKGROUND);
    }

    fn pixel(&self, x: usize, y: usize) -> Color {
        self.pixels[y * self.width + x]
    }

    fn fill_rect(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, fill: Color) {
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };

        let left = left.round().max(0.0) as usize;
        let right = (right.round().max(0.0) as usize).min(self.width);
        let top = top.round().max(0.0) as usize;
        let bottom = (bottom.round().max(0.0) as usize).min(self.height);

        for y in top..bottom {
            for x in left..right {
                self.pixels[y * self.width + x] = fill;
            }
        }
    }

    // Even-odd scanline fill, sampling at pixel centres.
    fn fill_polygon(&mut self, points: &[[f32; 2]], fill: Color) {
        if points.len() < 3 {
            return;
        }

        let min_y = points.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
        let max_y = points.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);
        if !min_y.is_finite() || !max_y.is_finite() || max_y <= 0.0 {
            return;
        }
        let first_row = min_y.floor().max(0.0) as usize;
        let last_row = (max_y.ceil() as usize).min(self.height);

        let mut crossings: Vec<f32> = Vec::new();
        for y in first_row..last_row {
            let scan = y as f32 + 0.5;
            crossings.clear();
            for i in 0..points.len() {
                let [x_a, y_a] = points[i];
                let [x_b, y_b] = points[(i + 1) % points.len()];
                if (y_a <= scan) != (y_b <= scan) {
                    let t = (scan - y_a) / (y_b - y_a);
                    crossings.push(x_a + t * (x_b - x_a));
                }
            }
            crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            for pair in crossings.chunks_exact(2) {
                let start = pair[0].round().max(0.0) as usize;
                let end = (pair[1].round().max(0.0) as usize).min(self.width);
                for x in start..end {
                    self.pixels[y * self.width + x] = fill;
                }
            }
        }
    }
}

/// A [`Surface`] drawing to the terminal through an alternate screen.
///
/// Raw mode and the alternate screen are restored when the canvas drops,
/// whichever way the interface loop exits.
pub struct TerminalCanvas {
    out: Stdout,
    columns: u16,
    rows: u16,
    grid: PixelGrid,
}

impl TerminalCanvas {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        execute!(out, terminal::EnterAlternateScreen, cursor::Hide)?;

        let (columns, rows) = terminal::size()?;
        let grid = PixelGrid::new(columns as usize, rows as usize * 2);
        Ok(Self {
            out,
            columns,
            rows,
            grid,
        })
    }
}

impl Surface for TerminalCanvas {
    fn size(&self) -> CanvasSize {
        CanvasSize::new(self.columns as f32, self.rows as f32 * 2.0)
    }

    fn clear(&mut self) {
        if let Ok((columns, rows)) = terminal::size() {
            self.columns = columns;
            self.rows = rows;
        }
        self.grid.reset(self.columns as usize, self.rows as usize * 2);
    }

    fn fill_rect(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, fill: Color) {
        self.grid.fill_rect(x1, y1, x2, y2, fill);
    }

    fn fill_polygon(&mut self, points: &[[f32; 2]], fill: Color) {
        self.grid.fill_polygon(points, fill);
    }

    fn present(&mut self) -> Result<()> {
        let mut foreground = None;
        let mut background = None;

        for row in 0..self.grid.height / 2 {
            queue!(self.out, cursor::MoveTo(0, row as u16))?;
            for column in 0..self.grid.width {
                let top = self.grid.pixel(column, row * 2);
                let bottom = self.grid.pixel(column, row * 2 + 1);

                if foreground != Some(top) {
                    queue!(self.out, style::SetForegroundColor(term_color(top)))?;
                    foreground = Some(top);
                }
                if background != Some(bottom) {
                    queue!(self.out, style::SetBackgroundColor(term_color(bottom)))?;
                    background = Some(bottom);
                }
                queue!(self.out, style::Print(HALF_BLOCK))?;
            }
        }

        queue!(self.out, style::ResetColor)?;
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for TerminalCanvas {
    fn drop(&mut self) {
        let _ = execute!(
            self.out,
            style::ResetColor,
            cursor::Show,
            terminal::LeaveAlternateScreen
        );
        let _ = terminal::disable_raw_mode();
    }
}

fn term_color(color: Color) -> TermColor {
    TermColor::Rgb {
        r: color.r,
        g: color.g,
        b: color.b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::new(255, 0, 0);

    fn filled_pixels(grid: &PixelGrid) -> usize {
        (0..grid.height)
            .flat_map(|y| (0..grid.width).map(move |xy| (xy, y)))
            .filter(|&(x, y)| grid.pixel(x, y) != BACKGROUND)
            .count()
    }

    #[test]
    fn rects_fill_whole_pixel_runs() {
        let mut grid = PixelGrid::new(20, 10);
        grid.fill_rect(2.0, 3.0, 5.0, 7.0, RED);

        assert_eq!(filled_pixels(&grid), 3 * 4);
        assert_eq!(grid.pixel(2, 3), RED);
        assert_eq!(grid.pixel(4, 6), RED);
        assert_eq!(grid.pixel(5, 3), BACKGROUND);
    }

    #[test]
    fn rects_accept_unordered_corners_and_clamp() {
        let mut grid = PixelGrid::new(8, 8);
        // Corners swapped and partly off-canvas.
        grid.fill_rect(12.0, 6.0, 5.0, -2.0, RED);

        assert_eq!(grid.pixel(5, 0), RED);
        assert_eq!(grid.pixel(7, 5), RED);
        assert_eq!(grid.pixel(4, 3), BACKGROUND);
        assert_eq!(filled_pixels(&grid), 3 * 6);
    }

    #[test]
    fn polygons_fill_their_interior() {
        let mut grid = PixelGrid::new(16, 16);
        grid.fill_polygon(&[[2.0, 2.0], [10.0, 2.0], [10.0, 6.0], [2.0, 6.0]], RED);

        // An axis-aligned square polygon matches the rect fill.
        assert_eq!(filled_pixels(&grid), 8 * 4);
        assert_eq!(grid.pixel(2, 2), RED);
        assert_eq!(grid.pixel(9, 5), RED);
        assert_eq!(grid.pixel(10, 2), BACKGROUND);
    }

    #[test]
    fn degenerate_polygons_draw_nothing() {
        let mut grid = PixelGrid::new(8, 8);
        grid.fill_polygon(&[[1.0, 1.0], [5.0, 5.0]], RED);
        assert_eq!(filled_pixels(&grid), 0);

        grid.fill_polygon(&[[1.0, 1.0], [5.0, 1.0], [3.0, 1.0]], RED);
        assert_eq!(filled_pixels(&grid), 0);
    }

    #[test]
    fn reset_adopts_new_dimensions() {
        let mut grid = PixelGrid::new(4, 4);
        grid.fill_rect(0.0, 0.0, 4.0, 4.0, RED);
        grid.reset(6, 2);

        assert_eq!(grid.width, 6);
        assert_eq!(grid.height, 2);
        assert_eq!(filled_pixels(&grid), 0);
    }
}

use std::io;
use unicode_width::UnicodeWidthChar;

use crate::cache::BLANK;
use crate::client::display::Display;
use crate::telemetry::PerfGuard;
use crate::world::World;

/// Drawn in place of glyphs wider than one terminal column.
pub const WIDE_PLACEHOLDER: char = '.';

/// Terminal rows reserved below the canvas for the status bar.
pub const STATUS_ROWS: u16 = 1;

/// Rows of a terminal left for the canvas once the status bar is placed.
pub fn canvas_rows(screen_rows: u16) -> u16 {
    screen_rows.saturating_sub(STATUS_ROWS).max(1)
}

/// Terminal cell to draw for a cached canvas cell. Missing tiles,
/// control characters and zero-width marks all draw as blank.
pub fn display_char(cell: Option<char>) -> char {
    match cell {
        Some(ch) => match ch.width() {
            Some(1) => ch,
            Some(0) | None => BLANK,
            Some(_) => WIDE_PLACEHOLDER,
        },
        None => BLANK,
    }
}

/// Paints the visible region of the canvas plus a one-line status bar.
#[derive(Debug, Default)]
pub struct CanvasRenderer;

impl CanvasRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Draw one frame. The status bar goes on the row below the viewport, so
    /// the cursor never sits under it.
    pub fn draw(
        &self,
        world: &World,
        display: &mut dyn Display,
        message: Option<&str>,
    ) -> io::Result<()> {
        let _guard = PerfGuard::new("client_render");
        let viewport = world.viewport().lock().clone();
        let (width, height) = viewport.size();
        let region = viewport.visible_region();

        display.clear_screen()?;
        {
            let tiles = world.tiles().read();
            for row in 0..height {
                display.set_cursor(row as u16, 0)?;
                for col in 0..width {
                    let cell = tiles.get_cell(region.min_x + col, region.min_y + row);
                    display.write_char(display_char(cell))?;
                }
            }
        }

        let (x, y) = viewport.cursor_position();
        let mut status = format!("-- {} -- ({x}, {y})", viewport.mode().label());
        if let Some(message) = message {
            status.push_str("  ");
            status.push_str(message);
        }
        display.set_cursor(height as u16, 0)?;
        for ch in status.chars().take(width as usize) {
            display.write_char(display_char(Some(ch)))?;
        }

        let (col, row) = viewport.screen_cursor();
        display.set_cursor(row as u16, col as u16)?;
        display.flush()
    }
}

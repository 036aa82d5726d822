use crate::cache::{TILE_HEIGHT, TILE_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Normal,
    Insert,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Insert => "INSERT",
        }
    }
}

/// Inclusive rectangle of absolute canvas positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl Region {
    pub fn expand(self, dx: i64, dy: i64) -> Self {
        Self {
            min_x: self.min_x - dx,
            min_y: self.min_y - dy,
            max_x: self.max_x + dx,
            max_y: self.max_y + dy,
        }
    }

    /// Grow by one tile on every side.
    pub fn with_tile_margin(self) -> Self {
        self.expand(TILE_WIDTH, TILE_HEIGHT)
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// The screen-sized window onto the canvas.
///
/// `center` is an absolute position; the cursor is a screen position that
/// always stays inside `[0, width) x [0, height)`. Moving the cursor past an
/// edge pans the center by the overflow instead, so the cursor's absolute
/// position moves by exactly the requested delta either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewport {
    center_x: i64,
    center_y: i64,
    cursor_col: i64,
    cursor_row: i64,
    width: i64,
    height: i64,
    mode: Mode,
    anchor_x: i64,
}

impl Viewport {
    /// Centered on the origin with the cursor in the middle of the screen.
    pub fn new(width: u16, height: u16) -> Self {
        let width = i64::from(width.max(1));
        let height = i64::from(height.max(1));
        Self {
            center_x: 0,
            center_y: 0,
            cursor_col: width / 2,
            cursor_row: height / 2,
            width,
            height,
            mode: Mode::Normal,
            anchor_x: 0,
        }
    }

    pub fn size(&self) -> (i64, i64) {
        (self.width, self.height)
    }

    pub fn center(&self) -> (i64, i64) {
        (self.center_x, self.center_y)
    }

    /// Cursor in screen coordinates `(col, row)`.
    pub fn screen_cursor(&self) -> (i64, i64) {
        (self.cursor_col, self.cursor_row)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Absolute column newline returns to while inserting.
    pub fn anchor(&self) -> Option<i64> {
        (self.mode == Mode::Insert).then_some(self.anchor_x)
    }

    pub fn visible_region(&self) -> Region {
        let min_x = self.center_x - self.width / 2;
        let min_y = self.center_y - self.height / 2;
        Region {
            min_x,
            min_y,
            max_x: min_x + self.width - 1,
            max_y: min_y + self.height - 1,
        }
    }

    /// Absolute position under the cursor.
    pub fn cursor_position(&self) -> (i64, i64) {
        let region = self.visible_region();
        (region.min_x + self.cursor_col, region.min_y + self.cursor_row)
    }

    /// Absolute position shown at a screen cell.
    pub fn screen_to_canvas(&self, col: i64, row: i64) -> (i64, i64) {
        let region = self.visible_region();
        (region.min_x + col, region.min_y + row)
    }

    pub fn move_cursor_by(&mut self, dx: i64, dy: i64) {
        let (col, pan_x) = clamp_with_overflow(self.cursor_col + dx, self.width);
        let (row, pan_y) = clamp_with_overflow(self.cursor_row + dy, self.height);
        self.cursor_col = col;
        self.cursor_row = row;
        self.center_x += pan_x;
        self.center_y += pan_y;
    }

    /// Pan so the cursor sits on `(x, y)` without moving it on screen.
    pub fn jump_to(&mut self, x: i64, y: i64) {
        let (cx, cy) = self.cursor_position();
        self.center_x += x - cx;
        self.center_y += y - cy;
    }

    pub fn enter_insert(&mut self) {
        if self.mode == Mode::Insert {
            return;
        }
        self.anchor_x = self.cursor_position().0;
        self.mode = Mode::Insert;
    }

    pub fn exit_insert(&mut self) {
        self.mode = Mode::Normal;
    }

    /// Move to the anchored column on the next row.
    pub fn newline(&mut self) {
        let (x, _) = self.cursor_position();
        let target = self.anchor().unwrap_or(x);
        self.move_cursor_by(target - x, 1);
    }

    /// Adopt a new screen size. The center stays put and the cursor is
    /// clamped onto the screen.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = i64::from(width.max(1));
        self.height = i64::from(height.max(1));
        self.cursor_col = self.cursor_col.clamp(0, self.width - 1);
        self.cursor_row = self.cursor_row.clamp(0, self.height - 1);
    }
}

/// Clamp `value` into `[0, limit)`, returning the clamped value and how far
/// it overflowed (negative when it went below zero).
fn clamp_with_overflow(value: i64, limit: i64) -> (i64, i64) {
    if value >= limit {
        (limit - 1, value - limit + 1)
    } else if value < 0 {
        (0, value)
    } else {
        (value, 0)
    }
}

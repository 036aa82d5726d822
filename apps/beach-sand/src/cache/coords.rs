//! Mapping between absolute canvas positions, tile coordinates and in-tile
//! offsets.
//!
//! The canvas is unbounded in every direction, so all divisions here are
//! floor divisions: `(-1, -1)` belongs to tile `(-1, -1)`, not `(0, 0)`.

use std::fmt;

/// Width of a tile in cells. Fixed by the server's wire format.
pub const TILE_WIDTH: i64 = 16;
/// Height of a tile in cells. Fixed by the server's wire format.
pub const TILE_HEIGHT: i64 = 8;
/// Number of cells stored in a single tile.
pub const TILE_CELLS: usize = (TILE_WIDTH * TILE_HEIGHT) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub tx: i64,
    pub ty: i64,
}

impl TileCoord {
    pub const fn new(tx: i64, ty: i64) -> Self {
        Self { tx, ty }
    }

    /// Absolute position of the tile's top-left cell.
    pub fn origin(self) -> (i64, i64) {
        tile_origin(self.tx, self.ty)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.tx, self.ty)
    }
}

/// Row-major index of a cell inside its tile, always in `[0, TILE_CELLS)`.
///
/// Only constructed from a position via [`offset_of`], so it can never drift
/// from the position it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileOffset(u16);

impl TileOffset {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Row within the tile, `0..TILE_HEIGHT`.
    #[inline]
    pub fn row(self) -> i64 {
        self.0 as i64 / TILE_WIDTH
    }

    /// Column within the tile, `0..TILE_WIDTH`.
    #[inline]
    pub fn col(self) -> i64 {
        self.0 as i64 % TILE_WIDTH
    }
}

#[inline]
pub fn tile_of(x: i64, y: i64) -> TileCoord {
    TileCoord::new(x.div_euclid(TILE_WIDTH), y.div_euclid(TILE_HEIGHT))
}

#[inline]
pub fn offset_of(x: i64, y: i64) -> TileOffset {
    let row = y.rem_euclid(TILE_HEIGHT);
    let col = x.rem_euclid(TILE_WIDTH);
    TileOffset((row * TILE_WIDTH + col) as u16)
}

#[inline]
pub fn tile_origin(tx: i64, ty: i64) -> (i64, i64) {
    (tx * TILE_WIDTH, ty * TILE_HEIGHT)
}

/// Inverse of the `(tile_of, offset_of)` pair.
pub fn position_of(tile: TileCoord, offset: TileOffset) -> (i64, i64) {
    let (x0, y0) = tile.origin();
    (x0 + offset.col(), y0 + offset.row())
}

use serde_json::Value;
use thiserror::Error;

use super::coords::{TILE_CELLS, TileOffset};

/// Character used for cells the server has never written.
pub const BLANK: char = ' ';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tile content has {found} cells, expected {}", TILE_CELLS)]
pub struct TileContentError {
    pub found: usize,
}

/// One tile's worth of cells plus whatever metadata the server attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    cells: Box<[char]>,
    properties: Value,
}

impl Tile {
    pub fn blank() -> Self {
        Self {
            cells: vec![BLANK; TILE_CELLS].into_boxed_slice(),
            properties: Value::Null,
        }
    }

    /// Builds a tile from the server's `content` string, one char per cell.
    pub fn from_content(content: &str) -> Result<Self, TileContentError> {
        let cells: Box<[char]> = content.chars().collect();
        if cells.len() != TILE_CELLS {
            return Err(TileContentError { found: cells.len() });
        }
        Ok(Self {
            cells,
            properties: Value::Null,
        })
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Server metadata, opaque to the client.
    pub fn properties(&self) -> &Value {
        &self.properties
    }

    #[inline]
    pub fn cell(&self, offset: TileOffset) -> char {
        self.cells[offset.index()]
    }

    #[inline]
    pub fn set_cell(&mut self, offset: TileOffset, ch: char) {
        self.cells[offset.index()] = ch;
    }

    pub fn content(&self) -> String {
        self.cells.iter().collect()
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self::blank()
    }
}

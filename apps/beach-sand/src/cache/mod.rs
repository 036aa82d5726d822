//! Client-side cache of the shared canvas.
//!
//! The canvas is cut into fixed 16x8 tiles. The server hands out whole tiles,
//! and the cache keeps them keyed by [`TileCoord`]:
//!
//! ```
//! # use beach_sand::cache::{Tile, TileCoord, TileStore};
//! let mut store = TileStore::new();
//! assert_eq!(store.get_cell(3, 2), None);
//! store.ingest(TileCoord::new(0, 0), Tile::blank());
//! assert!(store.set_cell(3, 2, 'A'));
//! assert_eq!(store.get_cell(3, 2), Some('A'));
//! ```
//!
//! A cell whose tile was never fetched reads as `None`. Callers render that
//! as blank. It does not mean something failed.

pub mod coords;
pub mod store;
pub mod tile;

pub use coords::{
    TILE_CELLS, TILE_HEIGHT, TILE_WIDTH, TileCoord, TileOffset, offset_of, position_of,
    tile_of, tile_origin,
};
pub use store::{DEFAULT_TILE_CAPACITY, TileStore};
pub use tile::{BLANK, Tile, TileContentError};

use std::collections::HashMap;

use tracing::trace;

use super::coords::{TileCoord, offset_of, tile_of};
use super::tile::Tile;

/// Default number of tiles retained before the least recently refreshed ones
/// are evicted. A 200x60 terminal plus margin needs roughly 150.
pub const DEFAULT_TILE_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Entry {
    tile: Tile,
    touched: u64,
}

/// Local cache of fetched tiles keyed by tile coordinate.
///
/// Server fetches replace tiles wholesale; local edits write single cells in
/// place. Once the store holds more than `capacity` tiles, the tiles that
/// were ingested or edited longest ago are dropped. Tiles around the viewport
/// are re-ingested on every refresh, so eviction naturally hits the regions
/// the user has moved away from. An evicted tile reads as absent until a
/// refresh covers it again.
#[derive(Debug)]
pub struct TileStore {
    tiles: HashMap<TileCoord, Entry>,
    capacity: usize,
    clock: u64,
}

impl TileStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tiles: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn tile(&self, coord: TileCoord) -> Option<&Tile> {
        self.tiles.get(&coord).map(|entry| &entry.tile)
    }

    /// Replace whatever is cached at `coord` with a freshly fetched tile.
    pub fn ingest(&mut self, coord: TileCoord, tile: Tile) {
        self.ingest_batch(std::iter::once((coord, tile)));
    }

    /// Ingest every tile of one fetch response. Tiles from the same batch are
    /// never evicted by that batch, even if it alone exceeds the capacity.
    pub fn ingest_batch<I>(&mut self, tiles: I) -> usize
    where
        I: IntoIterator<Item = (TileCoord, Tile)>,
    {
        self.clock += 1;
        let touched = self.clock;
        let mut count = 0;
        for (coord, tile) in tiles {
            self.tiles.insert(coord, Entry { tile, touched });
            count += 1;
        }
        self.evict_overflow(touched);
        count
    }

    /// Returns `None` when the owning tile has not been fetched yet.
    pub fn get_cell(&self, x: i64, y: i64) -> Option<char> {
        self.tiles
            .get(&tile_of(x, y))
            .map(|entry| entry.tile.cell(offset_of(x, y)))
    }

    /// Optimistically write a cell. Returns `false` without touching anything
    /// when the owning tile is not cached.
    pub fn set_cell(&mut self, x: i64, y: i64, ch: char) -> bool {
        self.clock += 1;
        let touched = self.clock;
        match self.tiles.get_mut(&tile_of(x, y)) {
            Some(entry) => {
                entry.tile.set_cell(offset_of(x, y), ch);
                entry.touched = touched;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    fn evict_overflow(&mut self, protected: u64) {
        while self.tiles.len() > self.capacity {
            let victim = self
                .tiles
                .iter()
                .filter(|(_, entry)| entry.touched < protected)
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(coord, _)| *coord);
            match victim {
                Some(coord) => {
                    self.tiles.remove(&coord);
                    trace!(target = "cache::store", tile = %coord, "evicted tile");
                }
                None => break,
            }
        }
    }
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new()
    }
}

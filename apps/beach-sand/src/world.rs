//! The client state shared by the input loop, the renderer and the sync tasks.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::trace;

use crate::cache::TileStore;
use crate::client::viewport::Viewport;
use crate::sync::queue::{EditQueue, EditRecord};

pub const DEFAULT_CLIENT_TAG: &str = "beach-sand";

/// Tile cache, pending edits and viewport, owned together and shared through
/// an `Arc`. Nothing outside the client mutates any of them.
///
/// Lock order when more than one is needed: viewport, then tiles. The edit
/// queue takes its own short lock and can be used under either.
pub struct World {
    tiles: RwLock<TileStore>,
    edits: EditQueue,
    viewport: Mutex<Viewport>,
    client_tag: Arc<str>,
}

impl World {
    pub fn new(viewport: Viewport, tiles: TileStore, client_tag: impl Into<Arc<str>>) -> Self {
        Self {
            tiles: RwLock::new(tiles),
            edits: EditQueue::new(),
            viewport: Mutex::new(viewport),
            client_tag: client_tag.into(),
        }
    }

    pub fn tiles(&self) -> &RwLock<TileStore> {
        &self.tiles
    }

    pub fn edits(&self) -> &EditQueue {
        &self.edits
    }

    pub fn viewport(&self) -> &Mutex<Viewport> {
        &self.viewport
    }

    pub fn client_tag(&self) -> &str {
        &self.client_tag
    }

    /// Write `ch` at an absolute position: update the cache optimistically
    /// (skipped if the tile has not been fetched yet) and queue the edit for
    /// the server either way.
    pub fn write_char(&self, x: i64, y: i64, ch: char) -> EditRecord {
        let cached = self.tiles.write().set_cell(x, y, ch);
        let record = EditRecord::now(x, y, ch, Arc::clone(&self.client_tag));
        self.edits.enqueue(record.clone());
        trace!(target = "world", x, y, %ch, cached, "edit queued");
        record
    }
}

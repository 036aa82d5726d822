use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::cache::{TileCoord, TileOffset, offset_of, tile_of};

/// One pending character change. The tile and offset are derived from the
/// absolute position on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRecord {
    x: i64,
    y: i64,
    ch: char,
    timestamp_ms: u64,
    client_tag: Arc<str>,
}

/// Identity used to recognise the same edit when a failed batch is requeued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditKey {
    pub tile: TileCoord,
    pub offset: TileOffset,
    pub timestamp_ms: u64,
}

impl EditRecord {
    pub fn new(x: i64, y: i64, ch: char, timestamp_ms: u64, client_tag: Arc<str>) -> Self {
        Self {
            x,
            y,
            ch,
            timestamp_ms,
            client_tag,
        }
    }

    /// Stamp an edit with the current wall clock.
    pub fn now(x: i64, y: i64, ch: char, client_tag: Arc<str>) -> Self {
        Self::new(x, y, ch, unix_millis(), client_tag)
    }

    pub fn position(&self) -> (i64, i64) {
        (self.x, self.y)
    }

    pub fn tile(&self) -> TileCoord {
        tile_of(self.x, self.y)
    }

    pub fn offset(&self) -> TileOffset {
        offset_of(self.x, self.y)
    }

    pub fn ch(&self) -> char {
        self.ch
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn client_tag(&self) -> &str {
        &self.client_tag
    }

    pub fn key(&self) -> EditKey {
        EditKey {
            tile: self.tile(),
            offset: self.offset(),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Insertion-ordered queue of edits the server has not received yet.
///
/// The input loop enqueues while the flush task drains, so `drain` swaps the
/// backing vector out under the lock: every edit lands in exactly one batch.
#[derive(Debug, Default)]
pub struct EditQueue {
    pending: Mutex<Vec<EditRecord>>,
}

impl EditQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, record: EditRecord) {
        self.pending.lock().push(record);
    }

    /// Take every queued edit, oldest first, leaving the queue empty.
    pub fn drain(&self) -> Vec<EditRecord> {
        mem::take(&mut *self.pending.lock())
    }

    /// Put a batch that failed to send back in front of anything queued since
    /// it was drained. Records already present (same tile, offset and
    /// timestamp) are not queued twice.
    pub fn requeue(&self, batch: Vec<EditRecord>) {
        if batch.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        let newer = mem::take(&mut *pending);
        let mut seen: HashSet<EditKey> = HashSet::with_capacity(batch.len() + newer.len());
        pending.reserve(batch.len() + newer.len());
        for record in batch.into_iter().chain(newer) {
            if seen.insert(record.key()) {
                pending.push(record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

//! Background sync between the local [`World`] and the canvas service.
//!
//! Two independent tasks share the world: refresh pulls every tile around
//! the viewport on a fixed interval, and flush pushes pending edits. Flush
//! owns the session credential and bootstraps it on demand.
//!
//! Local edits are applied to the cache optimistically. A refresh that lands
//! after an edit was made but before the server applied it overwrites the
//! cell with the server's older value; the next refresh after the flush
//! shows the edit again. Edits the server never accepts are reverted the
//! same way.

pub mod queue;

pub use queue::{EditKey, EditQueue, EditRecord};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{TileCoord, tile_of};
use crate::client::viewport::Viewport;
use crate::session::{RemoteChannel, RemoteError, SessionCredential};
use crate::world::World;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_FLUSH_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub refresh_interval: Duration,
    pub flush_interval: Duration,
    pub max_backoff: Duration,
    /// Failed sends an edit may take part in before it is dropped.
    pub max_flush_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_flush_attempts: DEFAULT_MAX_FLUSH_ATTEMPTS,
        }
    }
}

impl SyncConfig {
    /// Flush ticks to sit out after `failures` consecutive failures, so the
    /// next attempt happens `flush_interval * 2^failures` later, capped at
    /// `max_backoff`.
    pub fn backoff_ticks(&self, failures: u32) -> u64 {
        if failures == 0 {
            return 0;
        }
        let interval_ms = self.flush_interval.as_millis().max(1);
        let cap = (self.max_backoff.as_millis() / interval_ms).max(1);
        let cap = u64::try_from(cap).unwrap_or(u64::MAX);
        let factor = 1u64 << failures.min(32);
        factor.min(cap) - 1
    }

    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let ticks = self.backoff_ticks(failures).saturating_add(1);
        self.flush_interval
            .saturating_mul(u32::try_from(ticks).unwrap_or(u32::MAX))
    }
}

/// Status reported to the client loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Refreshed { tiles: usize },
    RefreshFailed { reason: String },
    SessionReady,
    SessionFailed { reason: String },
    Flushed { edits: usize },
    FlushFailed {
        edits: usize,
        retry_in: Duration,
        reason: String,
    },
    FlushDropped { edits: usize },
}

impl SyncEvent {
    /// Whether new tiles arrived and the canvas should be drawn again.
    pub fn refreshes_canvas(&self) -> bool {
        matches!(self, SyncEvent::Refreshed { .. })
    }

    /// Text for the status line. Routine successes stay quiet.
    pub fn status_text(&self) -> Option<String> {
        match self {
            SyncEvent::Refreshed { .. } | SyncEvent::Flushed { .. } => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::Refreshed { tiles } => write!(f, "refreshed {tiles} tiles"),
            SyncEvent::RefreshFailed { reason } => write!(f, "refresh failed: {reason}"),
            SyncEvent::SessionReady => f.write_str("session ready"),
            SyncEvent::SessionFailed { reason } => write!(f, "session failed: {reason}"),
            SyncEvent::Flushed { edits } => write!(f, "sent {edits} edits"),
            SyncEvent::FlushFailed {
                edits,
                retry_in,
                reason,
            } => write!(
                f,
                "send of {edits} edits failed ({reason}), retry in {}s",
                retry_in.as_secs()
            ),
            SyncEvent::FlushDropped { edits } => write!(f, "gave up on {edits} edits"),
        }
    }
}

/// Result of one flush tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing queued.
    Idle,
    /// Sitting out a backoff tick.
    Waiting,
    /// No credential; edits stay queued.
    SessionUnavailable,
    Sent(usize),
    Requeued(usize),
    /// Some edits ran out of attempts; the rest were requeued.
    Dropped { dropped: usize, requeued: usize },
}

/// Tile rectangle to fetch for a viewport: the visible region plus one tile
/// on every side.
pub fn prefetch_bounds(viewport: &Viewport) -> (TileCoord, TileCoord) {
    let region = viewport.visible_region().with_tile_margin();
    (
        tile_of(region.min_x, region.min_y),
        tile_of(region.max_x, region.max_y),
    )
}

#[derive(Default)]
struct FlushState {
    credential: Option<SessionCredential>,
    failures: u32,
    session_failures: u32,
    cooldown_ticks: u64,
    /// Failed sends per queued edit.
    attempts: HashMap<EditKey, u32>,
}

/// A drained batch while its send is outstanding. If the send future is
/// dropped before settling, the batch goes back on the queue.
struct InFlight<'a> {
    queue: &'a EditQueue,
    batch: Option<Vec<EditRecord>>,
}

impl<'a> InFlight<'a> {
    fn new(queue: &'a EditQueue, batch: Vec<EditRecord>) -> Self {
        Self {
            queue,
            batch: Some(batch),
        }
    }

    fn records(&self) -> &[EditRecord] {
        self.batch.as_deref().unwrap_or_default()
    }

    fn settle(mut self) -> Vec<EditRecord> {
        self.batch.take().unwrap_or_default()
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            warn!(
                target = "sync::flush",
                edits = batch.len(),
                "send cancelled, edits requeued"
            );
            self.queue.requeue(batch);
        }
    }
}

pub struct SyncCoordinator {
    world: Arc<World>,
    remote: Arc<dyn RemoteChannel>,
    config: SyncConfig,
    events: Option<UnboundedSender<SyncEvent>>,
    state: Mutex<FlushState>,
}

impl SyncCoordinator {
    pub fn new(world: Arc<World>, remote: Arc<dyn RemoteChannel>, config: SyncConfig) -> Self {
        Self {
            world,
            remote,
            config,
            events: None,
            state: Mutex::new(FlushState::default()),
        }
    }

    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn has_session(&self) -> bool {
        self.state.lock().credential.is_some()
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                trace!(target = "sync", "status receiver gone");
            }
        }
    }

    /// Fetch the tiles around the viewport and ingest them in one write.
    /// Failures leave the cache untouched.
    pub async fn refresh_once(&self) -> Result<usize, RemoteError> {
        let (min, max) = prefetch_bounds(&self.world.viewport().lock());
        trace!(target = "sync::refresh", %min, %max, "fetching region");
        match self.remote.fetch_region(min, max).await {
            Ok(tiles) => {
                let count = self.world.tiles().write().ingest_batch(tiles);
                debug!(target = "sync::refresh", tiles = count, "region refreshed");
                self.emit(SyncEvent::Refreshed { tiles: count });
                Ok(count)
            }
            Err(err) => {
                warn!(target = "sync::refresh", error = %err, "refresh failed");
                self.emit(SyncEvent::RefreshFailed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Return the cached credential, bootstrapping a new one if needed.
    /// A failed bootstrap arms the backoff and leaves the write path held.
    pub async fn ensure_session(&self) -> Option<SessionCredential> {
        let cached = self.state.lock().credential.clone();
        if cached.is_some() {
            return cached;
        }
        match self.remote.bootstrap_session().await {
            Ok(credential) => {
                let mut state = self.state.lock();
                state.credential = Some(credential.clone());
                state.session_failures = 0;
                drop(state);
                info!(target = "sync::session", "session established");
                self.emit(SyncEvent::SessionReady);
                Some(credential)
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.session_failures = state.session_failures.saturating_add(1);
                state.cooldown_ticks = self.config.backoff_ticks(state.session_failures);
                let attempts = state.session_failures;
                drop(state);
                error!(target = "sync::session", error = %err, attempts, "session bootstrap failed");
                self.emit(SyncEvent::SessionFailed {
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    /// One flush tick: wait out backoff, make sure a session exists, then
    /// send everything queued as a single batch.
    pub async fn flush_once(&self) -> FlushOutcome {
        {
            let mut state = self.state.lock();
            if state.cooldown_ticks > 0 {
                state.cooldown_ticks -= 1;
                return FlushOutcome::Waiting;
            }
        }

        let Some(credential) = self.ensure_session().await else {
            return FlushOutcome::SessionUnavailable;
        };

        let batch = self.world.edits().drain();
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }
        let count = batch.len();

        let in_flight = InFlight::new(self.world.edits(), batch);
        match self.remote.flush_edits(&credential, in_flight.records()).await {
            Ok(()) => {
                let batch = in_flight.settle();
                let mut state = self.state.lock();
                state.failures = 0;
                for record in &batch {
                    state.attempts.remove(&record.key());
                }
                drop(state);
                debug!(target = "sync::flush", edits = count, "edits sent");
                self.emit(SyncEvent::Flushed { edits: count });
                FlushOutcome::Sent(count)
            }
            Err(err) => self.handle_flush_failure(in_flight.settle(), err),
        }
    }

    /// Send whatever is queued right away, ignoring any backoff in progress.
    /// Used for the last attempt before exit.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.state.lock().cooldown_ticks = 0;
        self.flush_once().await
    }

    fn handle_flush_failure(&self, batch: Vec<EditRecord>, err: RemoteError) -> FlushOutcome {
        let mut state = self.state.lock();
        if err.is_auth_rejection() {
            state.credential = None;
        }
        state.failures = state.failures.saturating_add(1);
        let failures = state.failures;

        let mut retry = Vec::with_capacity(batch.len());
        let mut dropped = 0usize;
        for record in batch {
            let key = record.key();
            let tries = {
                let tries = state.attempts.entry(key).or_insert(0);
                *tries = tries.saturating_add(1);
                *tries
            };
            if tries >= self.config.max_flush_attempts {
                state.attempts.remove(&key);
                dropped += 1;
            } else {
                retry.push(record);
            }
        }

        if retry.is_empty() {
            state.failures = 0;
            state.cooldown_ticks = 0;
        } else {
            state.cooldown_ticks = self.config.backoff_ticks(failures);
        }
        drop(state);

        if dropped > 0 {
            warn!(
                target = "sync::flush",
                error = %err,
                edits = dropped,
                "dropping edits after repeated failures"
            );
            self.emit(SyncEvent::FlushDropped { edits: dropped });
        }

        let requeued = retry.len();
        if requeued > 0 {
            self.world.edits().requeue(retry);
            let retry_in = self.config.backoff_delay(failures);
            warn!(
                target = "sync::flush",
                error = %err,
                edits = requeued,
                attempts = failures,
                retry_in_ms = retry_in.as_millis() as u64,
                "send failed, edits requeued"
            );
            self.emit(SyncEvent::FlushFailed {
                edits: requeued,
                retry_in,
                reason: err.to_string(),
            });
        }

        if dropped > 0 {
            FlushOutcome::Dropped { dropped, requeued }
        } else {
            FlushOutcome::Requeued(requeued)
        }
    }

    /// Start the refresh and flush loops on the current runtime.
    pub fn spawn(self: Arc<Self>) -> SyncTasks {
        let (stop, mut stopped) = watch::channel(false);
        let refresh = {
            let coordinator = Arc::clone(&self);
            tokio::spawn(async move {
                let mut ticker = interval(coordinator.config.refresh_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let _ = coordinator.refresh_once().await;
                }
            })
        };
        let flush = tokio::spawn(async move {
            let mut ticker = interval(self.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                let outcome = self.flush_once().await;
                trace!(target = "sync::flush", ?outcome, "flush tick");
            }
            debug!(target = "sync::flush", "flush loop stopped");
        });
        SyncTasks {
            refresh,
            flush,
            stop,
        }
    }
}

/// Handles for the background loops. Dropping them stops the flush loop
/// after its current tick; the refresh loop keeps running.
pub struct SyncTasks {
    refresh: JoinHandle<()>,
    flush: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl SyncTasks {
    /// Stop both loops. A send already in progress is allowed to finish, so
    /// every edit ends up either delivered or back on the queue.
    pub async fn shutdown(self) {
        self.refresh.abort();
        let _ = self.stop.send(true);
        if let Err(err) = self.flush.await {
            warn!(target = "sync::flush", error = %err, "flush loop ended abnormally");
        }
    }
}

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use tracing::{debug, trace};

use crate::client::display::Display;
use crate::client::input::{InputModeController, KeyOutcome};
use crate::client::renderer::{CanvasRenderer, canvas_rows};
use crate::sync::SyncEvent;
use crate::world::World;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(4);

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("terminal io error: {0}")]
    Io(#[from] io::Error),
    #[error("shutdown requested")]
    Shutdown,
}

/// The input-poll/draw loop. Runs on a blocking thread; sync tasks report
/// back through `events`.
pub struct CanvasClient<D: Display> {
    world: Arc<World>,
    controller: InputModeController,
    display: D,
    renderer: CanvasRenderer,
    events: Option<UnboundedReceiver<SyncEvent>>,
    status: Option<(String, Instant)>,
    size: Option<(u16, u16)>,
    poll_interval: Duration,
    status_ttl: Duration,
    dirty: bool,
}

impl<D: Display> CanvasClient<D> {
    pub fn new(world: Arc<World>, display: D) -> Self {
        Self {
            controller: InputModeController::new(Arc::clone(&world)),
            world,
            display,
            renderer: CanvasRenderer::new(),
            events: None,
            status: None,
            size: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_ttl: DEFAULT_STATUS_TTL,
            dirty: true,
        }
    }

    pub fn with_events(mut self, events: UnboundedReceiver<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_status_ttl(mut self, ttl: Duration) -> Self {
        self.status_ttl = ttl;
        self
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Status message currently shown, if it has not expired.
    pub fn status(&self) -> Option<&str> {
        self.status.as_ref().map(|(text, _)| text.as_str())
    }

    /// Run until the user quits.
    pub fn run(&mut self) -> Result<(), ClientError> {
        debug!(target = "client::loop", "client loop started");
        loop {
            match self.step() {
                Ok(()) => {}
                Err(ClientError::Shutdown) => break,
                Err(err) => return Err(err),
            }
            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }
        debug!(target = "client::loop", "client loop stopped");
        Ok(())
    }

    fn step(&mut self) -> Result<(), ClientError> {
        self.sync_size()?;
        self.drain_events();
        self.expire_status();
        self.pump_input()?;
        if self.dirty {
            self.dirty = false;
            let message = self.status.as_ref().map(|(text, _)| text.as_str());
            self.renderer
                .draw(&self.world, &mut self.display, message)?;
        }
        Ok(())
    }

    fn sync_size(&mut self) -> io::Result<()> {
        let size = self.display.terminal_size()?;
        if self.size != Some(size) {
            let (cols, rows) = size;
            self.world.viewport().lock().resize(cols, canvas_rows(rows));
            debug!(target = "client::loop", cols, rows, "terminal resized");
            self.size = Some(size);
            self.dirty = true;
        }
        Ok(())
    }

    fn drain_events(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        loop {
            match events.try_recv() {
                Ok(event) => {
                    trace!(target = "client::loop", %event, "sync event");
                    if event.refreshes_canvas() {
                        self.dirty = true;
                    }
                    if let Some(text) = event.status_text() {
                        self.status = Some((text, Instant::now()));
                        self.dirty = true;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!(target = "client::loop", "sync event channel closed");
                    self.events = None;
                    break;
                }
            }
        }
    }

    fn expire_status(&mut self) {
        let expired = self
            .status
            .as_ref()
            .is_some_and(|(_, shown_at)| shown_at.elapsed() >= self.status_ttl);
        if expired {
            self.status = None;
            self.dirty = true;
        }
    }

    fn pump_input(&mut self) -> Result<(), ClientError> {
        while let Some(key) = self.display.poll_key()? {
            match self.controller.handle_key(Some(key)) {
                KeyOutcome::Quit => return Err(ClientError::Shutdown),
                KeyOutcome::Redraw => self.dirty = true,
                KeyOutcome::Ignored => {}
            }
        }
        Ok(())
    }
}

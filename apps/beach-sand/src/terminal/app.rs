use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::TileStore;
use crate::client::{CanvasClient, ClientError, CrosstermDisplay, Viewport, canvas_rows};
use crate::session::{HttpChannel, RemoteChannel};
use crate::sync::{FlushOutcome, SyncCoordinator};
use crate::terminal::cli::Cli;
use crate::terminal::error::CliError;
use crate::world::World;

/// Start the sync tasks, hand the terminal to the client loop, and tear
/// everything down once the user quits.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.client_config()?;
    info!(
        target = "terminal::app",
        world = %config.session.world_url(),
        cache_tiles = config.cache_capacity,
        "starting canvas client"
    );

    let remote: Arc<dyn RemoteChannel> = Arc::new(HttpChannel::new(config.session.clone())?);
    let (cols, rows) = crossterm::terminal::size()?;
    let world = Arc::new(World::new(
        Viewport::new(cols, canvas_rows(rows)),
        TileStore::with_capacity(config.cache_capacity),
        config.client_tag.as_str(),
    ));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let coordinator = Arc::new(
        SyncCoordinator::new(Arc::clone(&world), remote, config.sync.clone())
            .with_events(events_tx),
    );
    let tasks = Arc::clone(&coordinator).spawn();

    let client_world = Arc::clone(&world);
    let joined = tokio::task::spawn_blocking(move || -> Result<(), ClientError> {
        let display = CrosstermDisplay::enter()?;
        let mut client = CanvasClient::new(client_world, display).with_events(events_rx);
        client.run()
    })
    .await;
    tasks.shutdown().await;

    if !world.edits().is_empty() {
        let timeout = config.session.request_timeout();
        match tokio::time::timeout(timeout, coordinator.flush_now()).await {
            Ok(FlushOutcome::Sent(count)) => {
                debug!(target = "terminal::app", edits = count, "final flush sent")
            }
            Ok(outcome) => warn!(
                target = "terminal::app",
                ?outcome,
                pending = world.edits().len(),
                "edits left unsent at exit"
            ),
            Err(_) => warn!(
                target = "terminal::app",
                pending = world.edits().len(),
                "final flush timed out, edits left unsent at exit"
            ),
        }
    }

    match joined {
        Ok(result) => result.map_err(CliError::from),
        Err(err) => Err(CliError::Runtime(err.to_string())),
    }
}

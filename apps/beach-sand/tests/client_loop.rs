use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use beach_sand::cache::{Tile, TileCoord, TileStore};
use beach_sand::client::{CanvasClient, Display, Key, Mode, Viewport, canvas_rows};
use beach_sand::sync::SyncEvent;
use beach_sand::world::World;

/// Plays back a fixed key script and keeps the last drawn frame.
struct ScriptedDisplay {
    size: (u16, u16),
    screen: Vec<Vec<char>>,
    cursor: (u16, u16),
    script: VecDeque<Option<Key>>,
    frames: usize,
}

impl ScriptedDisplay {
    fn new(cols: u16, rows: u16, script: Vec<Option<Key>>) -> Self {
        Self {
            size: (cols, rows),
            screen: vec![vec![' '; cols as usize]; rows as usize],
            cursor: (0, 0),
            script: script.into(),
            frames: 0,
        }
    }

    fn row(&self, row: usize) -> String {
        self.screen[row].iter().collect()
    }
}

impl Display for ScriptedDisplay {
    fn clear_screen(&mut self) -> io::Result<()> {
        for line in &mut self.screen {
            line.fill(' ');
        }
        Ok(())
    }

    fn set_cursor(&mut self, row: u16, col: u16) -> io::Result<()> {
        self.cursor = (row, col);
        Ok(())
    }

    fn write_char(&mut self, ch: char) -> io::Result<()> {
        let (row, col) = self.cursor;
        if let Some(cell) = self
            .screen
            .get_mut(row as usize)
            .and_then(|line| line.get_mut(col as usize))
        {
            *cell = ch;
        }
        self.cursor = (row, col + 1);
        Ok(())
    }

    fn poll_key(&mut self) -> io::Result<Option<Key>> {
        match self.script.pop_front() {
            Some(key) => Ok(key),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "key script exhausted",
            )),
        }
    }

    fn terminal_size(&self) -> io::Result<(u16, u16)> {
        Ok(self.size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.frames += 1;
        Ok(())
    }
}

fn keys(text: &str) -> Vec<Option<Key>> {
    text.chars().map(|ch| Some(Key::Char(ch))).collect()
}

/// World whose viewport shows x in [0, 40) and y in [0, 9) on a 40x10
/// screen, with the origin tile cached.
fn world() -> Arc<World> {
    let mut viewport = Viewport::new(40, canvas_rows(10));
    viewport.jump_to(20, 4);
    let world = Arc::new(World::new(viewport, TileStore::new(), "it"));
    world
        .tiles()
        .write()
        .ingest(TileCoord::new(0, 0), Tile::blank());
    world
}

#[test_timeout::timeout(10)]
fn typing_draws_optimistically_and_queues_edits() {
    let world = world();
    let mut script = vec![None];
    // Walk to (2, 1), type two lines, then leave.
    script.extend(keys("hhhhhhhhhhhhhhhhhhkkk"));
    script.extend(keys("ihi"));
    script.push(Some(Key::Enter));
    script.extend(keys("yo"));
    script.push(None);
    script.push(Some(Key::Esc));
    script.push(None);
    script.extend(keys("q"));

    let display = ScriptedDisplay::new(40, 10, script);
    let mut client = CanvasClient::new(Arc::clone(&world), display).with_poll_interval(Duration::ZERO);
    client.run().expect("client loop");

    let screen = client.display();
    assert_eq!(&screen.row(1)[..6], "  hi  ");
    assert_eq!(&screen.row(2)[..6], "  yo  ");
    assert!(screen.row(9).starts_with("-- NORMAL -- (4, 2)"));

    let viewport = world.viewport().lock().clone();
    assert_eq!(viewport.mode(), Mode::Normal);
    assert_eq!(viewport.cursor_position(), (4, 2));

    let queued: Vec<((i64, i64), char)> = world
        .edits()
        .drain()
        .iter()
        .map(|edit| (edit.position(), edit.ch()))
        .collect();
    assert_eq!(
        queued,
        vec![((2, 1), 'h'), ((3, 1), 'i'), ((2, 2), 'y'), ((3, 2), 'o')]
    );
}

#[test_timeout::timeout(10)]
fn panning_past_the_edge_moves_the_window() {
    let world = world();
    let mut script = vec![None];
    script.extend(keys("LL"));
    script.push(None);
    script.extend(keys("q"));

    let display = ScriptedDisplay::new(40, 10, script);
    let mut client = CanvasClient::new(Arc::clone(&world), display).with_poll_interval(Duration::ZERO);
    client.run().expect("client loop");

    // Cursor started at screen column 20 (x = 20) and moved 32 cells right.
    let viewport = world.viewport().lock().clone();
    assert_eq!(viewport.cursor_position(), (52, 4));
    assert_eq!(viewport.screen_cursor(), (39, 4));
    assert_eq!(viewport.visible_region().min_x, 13);
    assert!(client.display().row(9).starts_with("-- NORMAL -- (52, 4)"));
}

#[test_timeout::timeout(10)]
fn cursor_never_reaches_the_status_row() {
    let world = world();
    world
        .tiles()
        .write()
        .ingest(TileCoord::new(1, 1), Tile::blank());
    let mut script = vec![None];
    // Eight rows down from row 4 pans past the bottom of the canvas.
    script.extend(keys("jjjjjjjjix"));
    script.push(None);
    script.push(Some(Key::Esc));
    script.extend(keys("q"));

    let display = ScriptedDisplay::new(40, 10, script);
    let mut client = CanvasClient::new(Arc::clone(&world), display).with_poll_interval(Duration::ZERO);
    client.run().expect("client loop");

    let viewport = world.viewport().lock().clone();
    assert_eq!(viewport.size(), (40, 9));
    assert_eq!(viewport.screen_cursor(), (21, 8));
    assert_eq!(viewport.cursor_position(), (21, 12));
    let screen = client.display();
    assert_eq!(screen.row(8).chars().nth(20), Some('x'));
    assert!(screen.row(9).starts_with("-- NORMAL -- (21, 12)"));
}

#[test_timeout::timeout(10)]
fn sync_status_is_shown_on_the_status_line() {
    let world = world();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(SyncEvent::RefreshFailed {
        reason: "request timed out".into(),
    })
    .expect("send event");

    let script = vec![None, Some(Key::Char('q'))];
    let display = ScriptedDisplay::new(60, 10, script);
    let mut client = CanvasClient::new(world, display)
        .with_events(rx)
        .with_poll_interval(Duration::ZERO);
    client.run().expect("client loop");

    assert!(
        client
            .display()
            .row(9)
            .contains("refresh failed: request timed out")
    );
    assert_eq!(client.status(), Some("refresh failed: request timed out"));
    drop(tx);
}

#[test_timeout::timeout(10)]
fn exhausted_input_surfaces_as_io_error() {
    let display = ScriptedDisplay::new(40, 10, vec![None]);
    let mut client = CanvasClient::new(world(), display).with_poll_interval(Duration::ZERO);
    assert!(client.run().is_err());
}

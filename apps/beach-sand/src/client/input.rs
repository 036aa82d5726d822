use std::sync::Arc;
use tracing::debug;

use crate::cache::{BLANK, TILE_HEIGHT, TILE_WIDTH};
use crate::client::viewport::Mode;
use crate::world::World;

/// Keys the client reacts to, independent of the terminal library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Esc,
    Up,
    Down,
    Left,
    Right,
    /// Ctrl-C.
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Nothing changed.
    Ignored,
    /// Viewport or canvas changed; draw again.
    Redraw,
    Quit,
}

const NORMAL_DELTAS: &[(char, (i64, i64))] = &[
    ('l', (1, 0)),
    ('h', (-1, 0)),
    ('j', (0, 1)),
    ('k', (0, -1)),
    ('L', (TILE_WIDTH, 0)),
    ('H', (-TILE_WIDTH, 0)),
    ('J', (0, TILE_HEIGHT)),
    ('K', (0, -TILE_HEIGHT)),
];

fn arrow_delta(key: Key) -> Option<(i64, i64)> {
    match key {
        Key::Right => Some((1, 0)),
        Key::Left => Some((-1, 0)),
        Key::Down => Some((0, 1)),
        Key::Up => Some((0, -1)),
        _ => None,
    }
}

fn normal_delta(key: Key) -> Option<(i64, i64)> {
    match key {
        Key::Char(c) => NORMAL_DELTAS
            .iter()
            .find(|(bound, _)| *bound == c)
            .map(|(_, delta)| *delta),
        other => arrow_delta(other),
    }
}

/// The normal/insert state machine. Mode lives on the viewport so the
/// renderer can show it; this type only decides what each key does.
pub struct InputModeController {
    world: Arc<World>,
}

impl InputModeController {
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }

    /// Apply one polled key. `None` (no input this cycle) is a no-op.
    pub fn handle_key(&self, key: Option<Key>) -> KeyOutcome {
        let Some(key) = key else {
            return KeyOutcome::Ignored;
        };
        if key == Key::Interrupt {
            return KeyOutcome::Quit;
        }
        let mode = self.world.viewport().lock().mode();
        match mode {
            Mode::Normal => self.handle_normal(key),
            Mode::Insert => self.handle_insert(key),
        }
    }

    fn handle_normal(&self, key: Key) -> KeyOutcome {
        match key {
            Key::Char('q') => KeyOutcome::Quit,
            Key::Char('i') => {
                let mut viewport = self.world.viewport().lock();
                viewport.enter_insert();
                debug!(target = "client::input", anchor = ?viewport.anchor(), "insert mode");
                KeyOutcome::Redraw
            }
            other => match normal_delta(other) {
                Some((dx, dy)) => {
                    self.world.viewport().lock().move_cursor_by(dx, dy);
                    KeyOutcome::Redraw
                }
                None => KeyOutcome::Ignored,
            },
        }
    }

    fn handle_insert(&self, key: Key) -> KeyOutcome {
        match key {
            Key::Esc => {
                self.world.viewport().lock().exit_insert();
                debug!(target = "client::input", "normal mode");
            }
            Key::Enter => self.world.viewport().lock().newline(),
            Key::Backspace => {
                let (x, y) = {
                    let mut viewport = self.world.viewport().lock();
                    viewport.move_cursor_by(-1, 0);
                    viewport.cursor_position()
                };
                self.world.write_char(x, y, BLANK);
            }
            Key::Char(ch) if !ch.is_control() => {
                let (x, y) = self.world.viewport().lock().cursor_position();
                self.world.write_char(x, y, ch);
                self.world.viewport().lock().move_cursor_by(1, 0);
            }
            other => match arrow_delta(other) {
                Some((dx, dy)) => self.world.viewport().lock().move_cursor_by(dx, dy),
                None => return KeyOutcome::Ignored,
            },
        }
        KeyOutcome::Redraw
    }
}

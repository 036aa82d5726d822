use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute, queue,
    style::Print,
    terminal::{
        self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
        enable_raw_mode,
    },
};
use std::io::{self, Write};
use std::time::Duration;

use crate::client::input::Key;

/// Terminal primitives the client draws with and reads keys from.
pub trait Display {
    fn clear_screen(&mut self) -> io::Result<()>;
    fn set_cursor(&mut self, row: u16, col: u16) -> io::Result<()>;
    fn write_char(&mut self, ch: char) -> io::Result<()>;
    /// Non-blocking: `None` when no key is waiting.
    fn poll_key(&mut self) -> io::Result<Option<Key>>;
    /// `(cols, rows)`.
    fn terminal_size(&self) -> io::Result<(u16, u16)>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Raw-mode, alternate-screen terminal. Restores the terminal on drop.
pub struct CrosstermDisplay {
    stdout: io::Stdout,
    active: bool,
}

impl CrosstermDisplay {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, EnterAlternateScreen, Hide) {
            let _ = disable_raw_mode();
            return Err(err);
        }
        Ok(Self {
            stdout,
            active: true,
        })
    }

    pub fn leave(&mut self) -> io::Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        execute!(self.stdout, Show, LeaveAlternateScreen)?;
        disable_raw_mode()
    }
}

impl Drop for CrosstermDisplay {
    fn drop(&mut self) {
        let _ = self.leave();
    }
}

impl Display for CrosstermDisplay {
    fn clear_screen(&mut self) -> io::Result<()> {
        queue!(self.stdout, Clear(ClearType::All))
    }

    fn set_cursor(&mut self, row: u16, col: u16) -> io::Result<()> {
        queue!(self.stdout, MoveTo(col, row))
    }

    fn write_char(&mut self, ch: char) -> io::Result<()> {
        queue!(self.stdout, Print(ch))
    }

    fn poll_key(&mut self) -> io::Result<Option<Key>> {
        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if let Some(mapped) = map_key_event(key) {
                    return Ok(Some(mapped));
                }
            }
        }
        Ok(None)
    }

    fn terminal_size(&self) -> io::Result<(u16, u16)> {
        terminal::size()
    }

    fn flush(&mut self) -> io::Result<()> {
        queue!(self.stdout, Show)?;
        self.stdout.flush()
    }
}

pub fn map_key_event(key: KeyEvent) -> Option<Key> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char(c) if c.eq_ignore_ascii_case(&'c') => Some(Key::Interrupt),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Backspace => Some(Key::Backspace),
        KeyCode::Esc => Some(Key::Esc),
        KeyCode::Up => Some(Key::Up),
        KeyCode::Down => Some(Key::Down),
        KeyCode::Left => Some(Key::Left),
        KeyCode::Right => Some(Key::Right),
        _ => None,
    }
}

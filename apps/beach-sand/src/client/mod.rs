//! Terminal front end: viewport math, key handling, drawing and the loop
//! that ties them together.

pub mod display;
pub mod input;
pub mod renderer;
pub mod terminal;
pub mod viewport;

pub use display::{CrosstermDisplay, Display};
pub use input::{InputModeController, Key, KeyOutcome};
pub use renderer::{CanvasRenderer, canvas_rows};
pub use terminal::{CanvasClient, ClientError};
pub use viewport::{Mode, Region, Viewport};

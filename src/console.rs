//! The console abstraction the reader drives.
//!
//! A [`Console`] owns the terminal for the duration of `prepare..restore`:
//! it decodes input bytes into events and turns virtual screens into the
//! minimal terminal output that realises them. The real implementation is
//! [`crate::UnixConsole`]; tests drive the reader through a scripted
//! console instead.

use std::time::Duration;

use crate::errors::Result;
use crate::event::{Event, KeyEvent};

pub trait Console {
    /// Take ownership of the terminal: save its state, enter raw mode,
    /// reset the virtual-screen cache. Fails if another console is active.
    fn prepare(&mut self) -> Result<()>;

    /// Undo everything `prepare` did. Must be safe to call on every exit
    /// path, including after errors.
    fn restore(&mut self) -> Result<()>;

    /// Transform the physical screen into `screen`, leaving the cursor at
    /// `c_xy` (column, row in virtual-screen coordinates).
    fn refresh(&mut self, screen: Vec<String>, c_xy: (usize, usize)) -> Result<()>;

    /// Move the cursor without repainting. Requests outside the visible
    /// window enqueue a scroll event instead.
    fn move_cursor(&mut self, x: usize, y: usize) -> Result<()>;

    /// Pull one event, reading input bytes as needed. With `block` false,
    /// returns `Ok(None)` when nothing is ready.
    fn get_event(&mut self, block: bool) -> Result<Option<Event>>;

    /// Wait for input to become readable. `Ok(false)` on timeout.
    fn wait(&mut self, timeout: Option<Duration>) -> Result<bool>;

    /// Feed one raw input byte into the event queue.
    fn push_char(&mut self, byte: u8);

    /// Merge all queued key events and any readahead the OS is holding
    /// into a single key event.
    fn getpending(&mut self) -> Result<KeyEvent>;

    /// Discard input the OS is holding (typed-ahead keys).
    fn forgetinput(&mut self) -> Result<()>;

    fn beep(&mut self);

    /// Clear the physical screen and forget the cached one.
    fn clear(&mut self);

    /// Move the cursor past the last written line, ready for normal
    /// program output.
    fn finish(&mut self) -> Result<()>;

    fn set_cursor_vis(&mut self, visible: bool);

    /// Forget the cached screen contents so the next refresh repaints
    /// every row (after a resize, or an explicit repaint request).
    fn repaint_prep(&mut self);

    fn height(&self) -> usize;
    fn width(&self) -> usize;
}

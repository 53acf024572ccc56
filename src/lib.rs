//! relish — readline-ish terminal line editing.
//!
//! One [`Reader::readline`] call reads a single- or multi-line input from
//! a character-cell terminal with in-place editing, history navigation,
//! incremental history search and programmable completion. Rendering is
//! capability-driven: the console diffs the previous physical screen
//! against the new virtual one and emits the minimal terminfo-described
//! output to get there.
//!
//! Most embedders want the [`Readline`] façade:
//!
//! ```no_run
//! # #[cfg(unix)] fn demo() -> relish::Result<()> {
//! let mut rl = relish::Readline::new()?;
//! rl.set_completer(|stem, _line| {
//!     ["open", "opt", "other"]
//!         .iter()
//!         .filter(|w| w.starts_with(stem))
//!         .map(|w| w.to_string())
//!         .collect()
//! });
//! let line = rl.input(">>> ")?;
//! # let _ = line; Ok(()) }
//! ```
//!
//! The layers underneath are usable on their own: [`event::EventQueue`]
//! turns raw bytes into key events, [`keymap::KeymapTranslator`] resolves
//! them against a compiled keymap, and [`Reader`] runs the command loop
//! over any [`Console`] implementation.

pub mod commands;
pub mod completion;
pub mod config;
pub mod console;
pub mod errors;
pub mod event;
pub mod history;
pub mod keymap;
pub mod reader;
pub mod readline;
#[cfg(unix)]
pub mod unix_console;

pub use completion::{Completer, CompletionState};
pub use config::Config;
pub use console::Console;
pub use errors::{Error, Result};
pub use event::{Event, Key, KeyEvent};
pub use history::{HistoryState, IsearchDirection};
pub use keymap::{KeymapTranslator, Translated, parse_keys};
pub use reader::{CmdKind, CommandDef, Feature, Reader, Syntax};
#[cfg(unix)]
pub use readline::Readline;
#[cfg(unix)]
pub use unix_console::{ConsoleOptions, UnixConsole};

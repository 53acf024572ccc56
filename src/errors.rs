use thiserror::Error;

/// Library-level errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The terminal is missing a required capability or is otherwise
    /// unusable for full-screen line editing. Fatal.
    #[error("invalid terminal: {0}")]
    Terminal(String),

    #[error("bad key spec `{spec}`: {reason}")]
    KeySpec { spec: String, reason: String },

    /// Ctrl-C arrived while a line was being read. The terminal has
    /// already been restored when this surfaces.
    #[error("interrupted")]
    Interrupted,

    /// Ctrl-D on an empty buffer: end of input.
    #[error("end of input")]
    Eof,

    /// A reader already owns the terminal; only one may be active.
    #[error("another reader is already active on this terminal")]
    ReaderBusy,

    #[error("no history item at position {0}")]
    HistoryIndex(usize),

    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(unix)]
impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(std::io::Error::from_raw_os_error(errno as i32))
    }
}

#[cfg(unix)]
impl From<terminfo::Error> for Error {
    fn from(err: terminfo::Error) -> Self {
        Error::Terminal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

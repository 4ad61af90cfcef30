use thiserror::Error;

/// Client-side error taxonomy.
///
/// Everything except a failed `connect()` at session start is recoverable at
/// this boundary: sessions keep running and the error is surfaced on the
/// instance's event channel instead of terminating anything.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] strom_core::Error),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Commit error: {0}")]
    Commit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session closed")]
    Closed,
}

impl Error {
    /// Best-effort duplicate for fanning one error out to both a caller and
    /// an event channel. Variants wrapping non-cloneable sources are rebuilt
    /// from the source's message text, keeping the variant.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Transport(s) => Self::Transport(s.clone()),
            Self::Metadata(s) => Self::Metadata(s.clone()),
            Self::Callback(s) => Self::Callback(s.clone()),
            Self::Commit(s) => Self::Commit(s.clone()),
            Self::Config(s) => Self::Config(s.clone()),
            Self::Closed => Self::Closed,
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Codec(e) => Self::Codec(strom_core::Error::InvalidEnvelope(e.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

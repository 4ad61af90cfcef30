use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
}

pub type Result<T> = std::result::Result<T, Error>;

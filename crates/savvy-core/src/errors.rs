/// Core error type shared by the bot crates.
///
/// Adapter crates map their specific errors into this type so the conversation
/// engine can treat failures uniformly (log, then reply with a friendly message).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use std::{sync::Arc, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors are cloneable so a single indexing failure can reject every
/// caller waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unrecognized dataset shape: expected `persons`, `documents` or `items`")]
    UnrecognizedShape,

    #[error("record {index} has no usable identifier")]
    MissingId { index: usize },

    #[error("indexing failed: {0}")]
    Indexing(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("an indexing round is already in flight")]
    IndexingInProgress,

    #[error("index worker did not respond within {0:?}")]
    Timeout(Duration),

    #[error("index worker is gone")]
    WorkerGone,

    #[error("index coordinator has shut down")]
    CoordinatorClosed,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

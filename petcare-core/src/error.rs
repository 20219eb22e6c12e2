//! Error type shared by the schedule engine and the store.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Bad interval amount or unit. Raised before anything touches the network.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// A timestamp that could not be parsed or represented.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("unknown schedule kind '{0}'")]
    InvalidKind(String),

    /// The persisted mirror could not be read or written.
    #[error("mirror error at {}: {message}", path.display())]
    Mirror { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;

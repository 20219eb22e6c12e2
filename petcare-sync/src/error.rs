//! Error taxonomy for remote synchronization.

use petcare_core::ScheduleError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Bad interval amount/unit; caught before any request is sent.
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Other local validation failures (empty name, bad start time).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A row from the remote that cannot become a schedule item.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Local store or mirror failure.
    #[error(transparent)]
    Store(ScheduleError),

    /// Transport failure, or a non-success status the server gave no better meaning to.
    #[error("remote unavailable at {endpoint} ({}): {body}", status_label(.status))]
    RemoteUnavailable {
        endpoint: String,
        status: Option<u16>,
        body: String,
    },

    /// Missing or rejected credential; the caller should re-authenticate.
    #[error("unauthorized at {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("not found at {endpoint}: {body}")]
    NotFound { endpoint: String, body: String },

    /// The server answered but did not confirm the deletion.
    #[error("server did not confirm deletion of {entity_id}")]
    DeleteNotConfirmed { entity_id: String },

    #[error("cannot decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// The detached sync task panicked or was cancelled by runtime shutdown.
    #[error("sync task aborted: {0}")]
    Aborted(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

impl From<ScheduleError> for SyncError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::InvalidInterval(msg) => Self::InvalidInterval(msg),
            ScheduleError::InvalidTimestamp(msg) => Self::InvalidRequest(msg),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

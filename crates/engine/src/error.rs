use recon_core::{CoreError, ReportId};
use recon_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad caller input, rejected before any store access.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store could not be read while scanning. The whole run can be retried.
    #[error("scan failed: {0}")]
    Scan(#[source] StorageError),

    #[error("resolution failed for report {report_id}: {message}")]
    Resolution {
        report_id: ReportId,
        message: String,
    },

    #[error("update failed for report {report_id}: {message}")]
    Update {
        report_id: ReportId,
        message: String,
    },

    #[error("backup failed: {0}")]
    Backup(String),

    #[error("illegal step transition: {0}")]
    InvalidTransition(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("run cancelled before step {0}")]
    Cancelled(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Scan(_))
    }
}

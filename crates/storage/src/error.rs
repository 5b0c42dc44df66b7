use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("core error: {0}")]
    Core(#[from] recon_core::CoreError),
}

impl StorageError {
    /// Maps sqlite constraint failures onto `ConstraintViolation`, leaving other errors as-is.
    pub(crate) fn from_write(err: rusqlite::Error, context: impl Into<String>) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = msg.clone().unwrap_or_else(|| e.to_string());
                StorageError::ConstraintViolation(format!("{}: {detail}", context.into()))
            }
            other => StorageError::Sqlite(other),
        }
    }
}

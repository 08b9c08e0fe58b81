use thiserror::Error;

/// Error shared by every persistence collaborator.
///
/// `NotFound` is a sentinel for a missing row and never means the backend
/// failed; `Unavailable` is a transient infrastructure failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

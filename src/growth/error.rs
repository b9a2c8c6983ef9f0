//! Error type shared by every growth component
//!
//! Validation failures (unknown referral code, missing conversion, duplicate
//! award) are NOT errors: they come back as negative outcomes. What remains
//! here is store unavailability and programming/config faults.

use rusqlite::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum GrowthError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Clock error: timestamp {0} is out of range")]
    Clock(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store connection lock poisoned")]
    LockPoisoned,
}

pub type GrowthResult<T> = Result<T, GrowthError>;

impl GrowthError {
    /// True when the caller may retry the same call verbatim
    ///
    /// Every write path in this crate is idempotent, so retrying after a busy
    /// or unavailable store cannot double-award or double-qualify.
    pub fn is_retryable(&self) -> bool {
        match self {
            GrowthError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::SystemIoFailure
            ),
            GrowthError::Io(_) | GrowthError::LockPoisoned => true,
            _ => false,
        }
    }
}

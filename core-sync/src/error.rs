use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Library(LibraryError::Database(err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

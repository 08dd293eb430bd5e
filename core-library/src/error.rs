use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value failed validation before it reached SQLite.
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl LibraryError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        LibraryError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;

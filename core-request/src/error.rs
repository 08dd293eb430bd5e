use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid priority: {0}")]
    InvalidPriority(i32),

    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RequestError>;

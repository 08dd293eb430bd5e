use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache capacity: {0}")]
    InvalidCapacity(String),

    #[error("Entry of {size} bytes exceeds cache budget of {budget} bytes")]
    EntryTooLarge { size: u64, budget: u64 },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

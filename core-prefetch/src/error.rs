use bridge_traits::BridgeError;
use core_cache::CacheError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrefetchError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

pub type Result<T> = std::result::Result<T, PrefetchError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Request executor setup failed: {0}")]
    Request(#[from] core_request::RequestError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Cache error: {0}")]
    Cache(#[from] core_cache::CacheError),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Prefetch error: {0}")]
    Prefetch(#[from] core_prefetch::PrefetchError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A runtime setting is out of range. The live settings are unchanged.
    #[error("Invalid setting `{setting}`: {message}")]
    InvalidSetting {
        setting: &'static str,
        message: String,
    },

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl Error {
    pub(crate) fn setting(setting: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidSetting {
            setting,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

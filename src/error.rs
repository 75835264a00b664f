use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote API error ({status}): {message}")]
    RemoteApi { status: u16, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sink delivery failed: {0}")]
    Sink(String),

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl BridgeError {
    pub fn storage(message: impl std::fmt::Display) -> Self {
        BridgeError::Storage {
            message: message.to_string(),
        }
    }

    /// True for operator responses that mean the session token is no longer accepted.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, BridgeError::RemoteApi { status: 401, .. })
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(e: rusqlite::Error) -> Self {
        BridgeError::storage(e)
    }
}

#[cfg(feature = "db")]
impl From<libsql::Error> for BridgeError {
    fn from(e: libsql::Error) -> Self {
        BridgeError::storage(e)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

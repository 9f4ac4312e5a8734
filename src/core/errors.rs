use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Remote file store is not configured")]
    StoreUnavailable,

    #[error("Folder resolution failed: {0}")]
    FolderResolution(String),

    /// 存储层返回的原始错误信息，原样透传
    #[error("{0}")]
    Transport(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::Metadata(message.into())
    }

    pub fn folder(message: impl Into<String>) -> Self {
        Self::FolderResolution(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<toml::de::Error> for QueueError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Error alias
pub type Result<T, E = QueueError> = std::result::Result<T, E>;

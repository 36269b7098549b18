use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a failed attempt should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Worth another attempt after the retry delay.
    Transient,
    /// Will fail the same way every time; recorded without retrying.
    Permanent,
    /// The environment is broken (unwritable directory and the like).
    Fatal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    /// Set when the provider recognized the content as private, removed or
    /// otherwise unavailable rather than a connection or server hiccup.
    pub unavailable: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unavailable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            unavailable: true,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TranscodeError(pub String);

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("{source}")]
    Provider {
        #[source]
        source: ProviderError,
        retry_unavailable: bool,
    },

    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("{}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no file was produced at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("no {0} stream is available for this item")]
    NoStream(&'static str),
}

impl DownloadError {
    pub fn provider(source: ProviderError, retry_unavailable: bool) -> Self {
        DownloadError::Provider {
            source,
            retry_unavailable,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::InvalidItem(_) => ErrorKind::Permanent,
            DownloadError::Provider {
                source,
                retry_unavailable,
            } => {
                if source.unavailable && !retry_unavailable {
                    ErrorKind::Permanent
                } else {
                    ErrorKind::Transient
                }
            }
            DownloadError::Transcode(_) => ErrorKind::Transient,
            DownloadError::Filesystem { .. } => ErrorKind::Fatal,
            DownloadError::MissingOutput(_) => ErrorKind::Transient,
            DownloadError::NoStream(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

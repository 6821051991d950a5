use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EditorError>;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected {endpoint}: {status}")]
    Rejected { endpoint: String, status: String },

    #[error("no border is selected")]
    NoSelection,

    #[error("server is read-only")]
    ReadOnly,

    #[error("server does not support {feature}")]
    Unavailable { feature: String },

    #[error("expected {expected} mode, but {active} is open")]
    WrongMode {
        expected: &'static str,
        active: &'static str,
    },

    #[error("a request for this workflow is already in flight")]
    Busy,

    #[error("settings profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("required path does not exist: {path}")]
    MissingPath { path: PathBuf },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{message}")]
    Exit { code: i32, message: String },
}

impl EditorError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } => *code,
            Self::Rejected { .. } => 3,
            Self::Http(_) => 4,
            _ => 1,
        }
    }

    #[must_use]
    pub fn exit(code: i32, message: impl Into<String>) -> Self {
        Self::Exit {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn unavailable(feature: impl Into<String>) -> Self {
        Self::Unavailable {
            feature: feature.into(),
        }
    }

    /// Whether the failure happened before the server answered.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Io(_))
    }
}

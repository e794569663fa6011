use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchoolError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Certificate rendering unavailable: {0}")]
    RenderUnavailable(String),
}

/// Caller-facing classification of a [`SchoolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Forbidden,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound => 2,
            Self::BadRequest => 3,
            Self::Forbidden => 4,
            Self::Conflict => 5,
            Self::Internal => 1,
        }
    }
}

impl SchoolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RusqliteError(_)
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::ConfigError(_)
            | Self::RenderUnavailable(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show a caller. Persistence internals are never echoed.
    pub fn public_message(&self) -> String {
        match self {
            Self::RusqliteError(_) | Self::IoError(_) | Self::JsonError(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Maps a constraint violation onto `Conflict`, leaving other SQLite errors untouched.
pub fn conflict_on_constraint(err: rusqlite::Error, what: &str) -> SchoolError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SchoolError::Conflict(what.to_string())
        }
        other => SchoolError::RusqliteError(other),
    }
}

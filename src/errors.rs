use crate::store::StoreError;
use serde::Serialize;
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Why a user-supplied file or folder name was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameViolation {
    Blank,
    TooLong,
    ForbiddenCharacter(char),
    TrailingDot,
}

impl fmt::Display for NameViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameViolation::Blank => write!(f, "name must not be empty"),
            NameViolation::TooLong => write!(f, "name must be at most 60 characters"),
            NameViolation::ForbiddenCharacter('\0') => {
                write!(f, "name must not contain a NUL byte")
            }
            NameViolation::ForbiddenCharacter(c) => {
                write!(f, "name must not contain `{}`", c)
            }
            NameViolation::TrailingDot => write!(f, "name must not end with `.`"),
        }
    }
}

/// Errors raised by the folder layer.
///
/// Everything up to `StorageLimitExceeded` is a domain error with a message
/// safe to show the caller. `Store`, `Io` and `Archive` are infrastructure
/// failures, propagated unchanged and never reinterpreted as "not found".
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("invalid name `{name}`: {violation}")]
    InvalidName {
        name: String,
        violation: NameViolation,
    },
    #[error("{0}")]
    IllegalArgument(String),
    #[error("folder `{0}` not found")]
    FolderNotFound(String),
    #[error("folder `{0}` already exists")]
    FolderAlreadyExists(String),
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("file `{0}` already exists")]
    FileAlreadyExists(String),
    #[error("failed to delete object `{key}`: {reason}")]
    ObjectDeletion { key: String, reason: String },
    #[error(
        "storage limit exceeded: {requested} bytes requested, {available} bytes available"
    )]
    StorageLimitExceeded { available: u64, requested: u64 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Archive(#[from] zip::result::ZipError),
}

pub type DriveResult<T> = Result<T, DriveError>;

impl DriveError {
    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DriveError::InvalidName { .. } => "ValidationError",
            DriveError::IllegalArgument(_) => "IllegalArgument",
            DriveError::FolderNotFound(_) => "FolderNotFound",
            DriveError::FolderAlreadyExists(_) => "FolderAlreadyExists",
            DriveError::FileNotFound(_) => "FileNotFound",
            DriveError::FileAlreadyExists(_) => "FileAlreadyExists",
            DriveError::ObjectDeletion { .. } => "ObjectDeletionError",
            DriveError::StorageLimitExceeded { .. } => "StorageLimitExceeded",
            DriveError::Store(_) | DriveError::Io(_) | DriveError::Archive(_) => "Unexpected",
        }
    }

    /// HTTP-style status class of the error.
    pub fn status(&self) -> u16 {
        match self {
            DriveError::InvalidName { .. } | DriveError::IllegalArgument(_) => 400,
            DriveError::FolderNotFound(_) | DriveError::FileNotFound(_) => 404,
            DriveError::FolderAlreadyExists(_) | DriveError::FileAlreadyExists(_) => 409,
            DriveError::StorageLimitExceeded { .. } => 413,
            DriveError::ObjectDeletion { .. }
            | DriveError::Store(_)
            | DriveError::Io(_)
            | DriveError::Archive(_) => 500,
        }
    }

    /// True for errors whose message may be shown to the end user verbatim.
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            DriveError::Store(_) | DriveError::Io(_) | DriveError::Archive(_)
        )
    }
}

/// User-facing rendering of a failure.
#[derive(Debug, Serialize)]
pub struct AppError {
    pub status: u16,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: u16, kind: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: msg.into(),
        }
    }

    /// Generic failure; details belong in the log, not in the message.
    pub fn internal() -> Self {
        Self::new(500, "Unexpected", "internal error, please try again later")
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": self.message,
            "kind": self.kind,
            "status": self.status,
        })
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        if err.is_domain() {
            AppError::new(err.status(), err.kind(), err.to_string())
        } else {
            tracing::error!(error = ?err, "storage operation failed");
            AppError::internal()
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "command failed");
        AppError::internal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_message() {
        let app: AppError = DriveError::FolderNotFound("docs/".into()).into();
        assert_eq!(app.kind, "FolderNotFound");
        assert_eq!(app.message, "folder `docs/` not found");
        assert_eq!(app.to_json()["kind"], "FolderNotFound");
        assert_eq!(app.to_json()["status"], 404);
    }

    #[test]
    fn infrastructure_errors_are_hidden() {
        let err = DriveError::Store(StoreError::Io(io::Error::other("disk on fire")));
        assert!(!err.is_domain());
        let app: AppError = err.into();
        assert_eq!(app.kind, "Unexpected");
        assert_eq!(app.status, 500);
        assert!(!app.message.contains("disk on fire"));
    }

    #[test]
    fn quota_message_names_both_sizes() {
        let err = DriveError::StorageLimitExceeded {
            available: 1048566,
            requested: 1048600,
        };
        let msg = err.to_string();
        assert!(msg.contains("1048566"));
        assert!(msg.contains("1048600"));
    }
}

// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Error taxonomy for file-system operations.
//!
//! Parse and validation errors are raised before any backend request is
//! issued. Backend-reported conditions arrive as [`ClientError`] and are
//! translated here, never swallowed.

use std::io;

use thiserror::Error;

use crate::object_client::ClientError;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("malformed location '{location}': {reason}")]
    MalformedLocation { location: String, reason: String },

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no such file: {0}")]
    NotFound(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid metadata for {path}: {reason}")]
    InvalidMetadata { path: String, reason: String },

    #[error("upload to {target} failed: {reason}")]
    UploadFailed { target: String, reason: String },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("file system {0} is closed")]
    ClosedFilesystem(String),

    /// Copy succeeded but the source could not be removed; both objects exist.
    #[error("moved {source_path} to {target_path} but could not delete the source: {cause}")]
    PartialMove {
        source_path: String,
        target_path: String,
        cause: Box<FsError>,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl FsError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::MalformedLocation { location: location.into(), reason: reason.into() }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::InvalidPath { path: path.into(), reason: reason.into() }
    }

    /// Translate a backend error about `what` (a path or bucket string).
    pub fn from_client(err: ClientError, what: &str) -> Self {
        match err {
            ClientError::NoSuchBucket(_) | ClientError::NoSuchKey { .. } => {
                FsError::NotFound(what.to_string())
            }
            ClientError::AccessDenied(_) => FsError::AccessDenied(what.to_string()),
            ClientError::PreconditionFailed(_) => FsError::AlreadyExists(what.to_string()),
            ClientError::BodyConsumed => FsError::IllegalState(format!(
                "request body for {what} was already consumed"
            )),
            ClientError::Other(e) => FsError::Backend(e.context(what.to_string())),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> Self {
        let kind = match &err {
            FsError::NotFound(_) => io::ErrorKind::NotFound,
            FsError::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
            FsError::AccessDenied(_) => io::ErrorKind::PermissionDenied,
            FsError::UnsupportedOperation(_) => io::ErrorKind::Unsupported,
            FsError::InvalidArgument(_)
            | FsError::InvalidPath { .. }
            | FsError::MalformedLocation { .. } => io::ErrorKind::InvalidInput,
            FsError::Io(e) => e.kind(),
            _ => io::ErrorKind::Other,
        };
        match err {
            FsError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

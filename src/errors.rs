//! Error types.

use std::io::Error as IoError;
use std::path::PathBuf;

use crate::image::ImageName;

/// Tracker error.
///
/// Only [`Error::DirectoryUnavailable`] is fatal for a request. Every other kind is collected
/// into the request's error list and reported next to successful outcomes.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Storage directory is missing or cannot be read.
    #[error("storage directory '{}' is unavailable", path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    /// Filename from input is malformed, unsafe or carries a disallowed extension.
    ///
    /// Rejected before any I/O.
    #[error("invalid file selected: '{0}'")]
    InvalidSelection(String),

    /// Deletion was requested with an empty selection.
    #[error("select at least one file before deleting")]
    NothingSelected,

    /// Requested deletion target is absent from disk.
    #[error("file \"{0}\" could not be found on disk")]
    FileNotFound(ImageName),

    /// Unlink failed, the log entry was kept for a retry.
    #[error("unable to delete \"{name}\"")]
    DeletionFailed {
        name: ImageName,
        #[source]
        source: IoError,
    },

    /// Uploaded file could not be placed into the storage directory.
    #[error("failed to store upload \"{name}\"")]
    UploadFailed {
        name: ImageName,
        #[source]
        source: IoError,
    },

    /// Retention log or settings could not be written.
    #[error(transparent)]
    PersistenceError(#[from] PersistenceError),
}

impl Error {
    /// Whether the current request must be aborted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DirectoryUnavailable { .. })
    }

    /// Human-readable message shown to the user, including the cause if any.
    pub fn message(&self) -> String {
        match std::error::Error::source(self) {
            Some(source) => format!("{}: {}", self, source),
            None => self.to_string(),
        }
    }
}

/// Failed to write a persisted document.
#[derive(thiserror::Error, Debug)]
#[error("failed to persist '{}'", path.display())]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub reason: PersistenceErrorReason,
}

/// Reason why persisting failed.
#[derive(thiserror::Error, Debug)]
pub enum PersistenceErrorReason {
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    #[error("serialization error: {0}")]
    SerializeError(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn new(path: impl Into<PathBuf>, reason: impl Into<PersistenceErrorReason>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Non UTF-8 symbol in file name.
#[derive(thiserror::Error, Debug)]
#[error("non-UTF-8 symbol in file name")]
pub struct NonUtf8NameError;

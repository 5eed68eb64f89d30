//! File lifecycle transitions.
//!
//! A file is created `Pending`, becomes `Ready` once the uploader confirms the
//! byte transfer, and ends `Deleted`. Status never moves backwards and never
//! leaves `Deleted`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
    Pending,
    Ready,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "PENDING",
            FileStatus::Ready => "READY",
            FileStatus::Deleted => "DELETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "PENDING" => Some(FileStatus::Pending),
            "READY" => Some(FileStatus::Ready),
            "DELETED" => Some(FileStatus::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Uploader confirmed the bytes landed in object storage.
    Complete,
    /// Owner linked the file to a project. Status is unaffected but the
    /// file must be `Ready`.
    Attach,
    /// Owner removed the file.
    Delete,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot {transition:?} a file in state {from}")]
pub struct TransitionError {
    pub from: FileStatus,
    pub transition: Transition,
}

/// Outcome of applying a transition to a current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The status changes to the contained value.
    Moved(FileStatus),
    /// The file is already where the transition would take it.
    Unchanged,
}

/// Resolve `transition` against `from`.
///
/// Completing a `Ready` file is accepted as a no-op so retried confirmations
/// succeed.
pub fn step(from: FileStatus, transition: Transition) -> Result<Step, TransitionError> {
    match (from, transition) {
        (FileStatus::Pending, Transition::Complete) => Ok(Step::Moved(FileStatus::Ready)),
        (FileStatus::Ready, Transition::Complete | Transition::Attach) => Ok(Step::Unchanged),
        (FileStatus::Pending, Transition::Attach) => Err(TransitionError { from, transition }),
        (FileStatus::Pending | FileStatus::Ready, Transition::Delete) => {
            Ok(Step::Moved(FileStatus::Deleted))
        }
        (FileStatus::Deleted, _) => Err(TransitionError { from, transition }),
    }
}

use crate::origin::ResolveError;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Why a single entry could not be deployed. Contained at the entry boundary.
#[derive(Error, Debug)]
pub enum EntryError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("source missing: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("could not create path {}: {err}", .path.display())]
    DirectoryCreateFailed { path: PathBuf, err: io::Error },

    #[error("link creation failed: {err}")]
    LinkCreateFailed { err: io::Error },

    #[error("could not move away existing file to {}: {err}", .backup.display())]
    BackupRenameFailed { backup: PathBuf, err: io::Error },

    #[error("could not relink after backup: {err}")]
    RelinkFailed { err: io::Error },

    #[error("could not remove stale link: {err}")]
    RemoveFailed { err: io::Error },
}

/// Persisted state problems. Always reported as diagnostics, never fatal.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state load failed for {}: {reason}", .path.display())]
    StateLoadFailed { path: PathBuf, reason: String },

    #[error("state save failed for {}: {reason}", .path.display())]
    StateSaveFailed { path: PathBuf, reason: String },
}

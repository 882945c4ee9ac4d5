//! Error types for the swap engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the swap engine.
///
/// Steady-state I/O failures during swap or fetch are handled inside the
/// behaviour bodies (rollback plus logging) and never reach the caller;
/// this type covers setup and maintenance operations only.
#[derive(Error, Debug)]
pub enum SwapError {
    /// The swap directory could not be created or secured.
    #[error("swap directory {path} could not be prepared: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A swap file could not be removed.
    #[error("swap file {path} could not be removed: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The monitor thread could not be spawned.
    #[error("failed to spawn the memory monitor thread: {0}")]
    Monitor(#[source] io::Error),
}

pub type SwapResult<T> = Result<T, SwapError>;

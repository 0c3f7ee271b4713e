//! Differential synchronization of a local tree against a remote prefix

pub mod engine;
pub mod exclude;
pub mod pool;
pub mod scanner;

pub use engine::{classify, SyncEngine, SyncSummary, TransferContext, TransferDecision};
pub use exclude::ExcludeSet;
pub use pool::WorkerPool;
pub use scanner::{LocalFile, LocalFileScanner, Scan};

use crate::cloud::CloudError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A transfer failed with an error that is not a skip condition
    #[error("Sync aborted while transferring '{path}': {source}")]
    Aborted {
        path: String,
        #[source]
        source: CloudError,
    },

    /// Removing remote-only files of a mirroring run failed
    #[error("Sync aborted while removing {count} remote file(s): {source}")]
    DeleteAborted {
        count: usize,
        #[source]
        source: CloudError,
    },

    #[error("Cannot scan {path:?}: {message}")]
    Scan { path: PathBuf, message: String },

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("Invalid exclude pattern: {0}")]
    Exclude(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

// Error kinds for the CPU-view projection core.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A required cgroup controller file is absent or permission-denied.
    #[error("cgroup file not readable: {path}: {source}")]
    CgroupNotReadable { path: String, source: io::Error },

    /// Cgroup file contents did not match the expected format.
    #[error("could not parse {what}: {detail}")]
    ParseError { what: String, detail: String },

    /// Allocation failed; the caller should abort this one read.
    #[error("allocation failure while {context}")]
    AllocationFailure { context: String },

    /// The output buffer was too small for the rendered content.  Fatal for
    /// the call, logged as an internal error by the caller.
    #[error("output buffer truncated while rendering {what}")]
    BufferTruncation { what: String },

    /// A lock could not be initialized.  Fatal at init time.
    #[error("failed to initialize lock: {0}")]
    LockFailure(String),
}

impl CoreError {
    pub fn not_readable(path: impl Into<String>, source: io::Error) -> Self {
        CoreError::CgroupNotReadable {
            path: path.into(),
            source,
        }
    }

    pub fn parse(what: impl Into<String>, detail: impl Into<String>) -> Self {
        CoreError::ParseError {
            what: what.into(),
            detail: detail.into(),
        }
    }
}

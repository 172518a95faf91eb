use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the thread resolver, the fetch orchestrator and the ledger.
///
/// Errors tied to a single URL are collected per URL by the orchestrator
/// instead of aborting the rest of the batch.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// No post identifier could be extracted. Retrying the same input is pointless.
    #[error("cannot extract a post id from url: {0}")]
    MalformedUrl(String),

    #[error("metadata lookup timed out after {}s: {url}", timeout.as_secs())]
    MetadataFetchTimeout { url: String, timeout: Duration },

    #[error("metadata lookup failed for {url}: {message}")]
    MetadataFetchError { url: String, message: String },

    #[error("fetch timed out after {}s: {url}", timeout.as_secs())]
    FetchTimeout { url: String, timeout: Duration },

    #[error("fetch failed for {url} after {attempts} attempt(s): {message}")]
    FetchTransientError {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The fetch program could not be started at all.
    #[error("failed to run {program}: {source}")]
    CapabilityUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger I/O failed at {}: {source}", path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn ledger_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LedgerIo {
            path: path.into(),
            source,
        }
    }
}

//! Domain types passed between the resolver, the orchestrator and the scheduler.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

/// Canonical key of a post, extracted from its URL (the numeric status id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PostId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// All post URLs that make up one authored thread.
///
/// Index 0 is the starting post; later entries are its ancestors in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadDescriptor {
    pub conversation_id: PostId,
    pub post_urls: Vec<String>,
}

/// One file that a fetch call newly placed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    pub source_url: String,
    pub saved_path: PathBuf,
    pub date_bucket: NaiveDate,
}

/// A URL that could not be archived, with the reason.
#[derive(Debug)]
pub struct UrlFailure {
    pub url: String,
    pub error: ArchiveError,
}

/// Outcome of one orchestrator call.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Files newly saved by this call.
    pub saved: Vec<DownloadRecord>,
    /// URLs not fetched because their post was already in the ledger.
    pub skipped_count: usize,
    /// URLs fetched with zero new files but a clean "nothing to fetch" result.
    pub already_complete_count: usize,
    /// Per-URL failures. Never aborts sibling URLs.
    pub failures: Vec<UrlFailure>,
}

impl FetchReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Human-readable summary of every failure, joined with `"; "`.
    #[must_use]
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| f.error.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Where a message lives in its originating source (chat channel, note store, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub source: String,
    pub message_id: String,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.message_id)
    }
}

/// A unit of queued work drained by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A message to re-process; its outcome is reported back to the source.
    Message(MessageRef),
    /// A bare URL with no context to acknowledge against.
    Url(String),
}

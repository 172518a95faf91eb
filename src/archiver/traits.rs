use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;

use crate::error::ArchiveError;
use crate::models::PostId;

/// How a fetch call ended when the program itself ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Media was downloaded (or already present and skipped by the fetcher).
    Success,
    /// Terminal "done, nothing to do": no media exists for this URL.
    NothingToFetch,
    /// Transient failure worth retrying.
    Error { code: Option<i32>, message: String },
}

impl FetchOutcome {
    /// Whether the fetcher finished cleanly (no retry needed).
    #[must_use]
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, Self::Success | Self::NothingToFetch)
    }
}

/// Lightweight metadata of one post, used to walk reply chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostInfo {
    pub parent_id: Option<PostId>,
    pub author_name: Option<String>,
}

/// The external media download capability.
///
/// Single-post and user-media fetches are separate operations with their own
/// time budgets. Exceeding a budget is reported as `Err(FetchTimeout)`.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Download the media of one post into `dest`.
    async fn fetch_post(
        &self,
        url: &str,
        dest: &Path,
        filename_template: Option<&str>,
    ) -> Result<FetchOutcome, ArchiveError>;

    /// Crawl a whole user media page into `dest`, skipping posts in `known`.
    async fn fetch_user_media(
        &self,
        url: &str,
        dest: &Path,
        filename_template: &str,
        known: &BTreeSet<PostId>,
    ) -> Result<FetchOutcome, ArchiveError>;
}

/// The external post metadata capability.
#[async_trait]
pub trait PostInfoSource: Send + Sync {
    /// Look up the parent and author of the post at `url`.
    ///
    /// "Nothing found" is `Ok(PostInfo::default())`; only timeouts and
    /// process failures are errors.
    async fn post_info(&self, url: &str) -> Result<PostInfo, ArchiveError>;
}

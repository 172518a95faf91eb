//! Shared constants used across the application.

use std::time::Duration;

/// Upper bound on how many reply-parent hops a thread walk may take.
pub const DEFAULT_MAX_THREAD_DEPTH: usize = 50;

/// Attempts per URL for a single-post fetch before it is reported as failed.
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;

/// Time budget for one `--dump-json` metadata lookup.
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Time budget for one single-post download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Time budget for a whole user media page, which can hold thousands of files.
pub const DEFAULT_USER_MEDIA_TIMEOUT: Duration = Duration::from_secs(7200);

/// gallery-dl filename template for X/Twitter media.
///
/// Produces names like `AIUnajyu-2022329732306772314-01.jpg`; the post id is
/// parsed back out of these names after a user media page crawl.
pub const TWITTER_FILENAME_TEMPLATE: &str = "{author[name]}-{tweet_id}-{num:02d}.{extension}";

/// Base for canonical post URLs. `/i/status/{id}` is reachable without auth.
pub const CANONICAL_STATUS_BASE: &str = "https://x.com/i/status/";

/// Pending notification batches a ledger subscriber may hold before it is dropped.
pub const SUBSCRIBER_BUFFER: usize = 200;

/// The activity log keeps only this many most recent entries.
pub const MAX_LOG_ENTRIES: usize = 500;

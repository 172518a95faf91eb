//! Turns post URLs into archived files, pruning against the dedup ledger.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{debug, error, info, warn};

use super::traits::{FetchOutcome, MediaFetcher};
use crate::constants::{DEFAULT_FETCH_MAX_ATTEMPTS, TWITTER_FILENAME_TEMPLATE};
use crate::error::ArchiveError;
use crate::fs_utils::{ensure_dir, new_entries, new_partial_entries, snapshot_dir};
use crate::handlers::twitter::{extract_post_id, post_id_from_filename};
use crate::ledger::DedupLedger;
use crate::models::{DownloadRecord, FetchReport, PostId, UrlFailure};

/// Drives the fetch capability for batches of URLs.
///
/// Files land in `<save_root>/<YYYY-MM-DD>/`. The bucket date is resolved once
/// per call. New files are detected by diffing the bucket before and after
/// each fetch, so the fetcher's own naming stays opaque.
pub struct FetchOrchestrator {
    save_root: PathBuf,
    fetcher: Arc<dyn MediaFetcher>,
    ledger: Arc<DedupLedger>,
    max_attempts: u32,
}

struct Attempted {
    outcome: FetchOutcome,
    attempts: u32,
    files: Vec<PathBuf>,
}

impl FetchOrchestrator {
    pub fn new(
        save_root: impl Into<PathBuf>,
        fetcher: Arc<dyn MediaFetcher>,
        ledger: Arc<DedupLedger>,
    ) -> Self {
        Self {
            save_root: save_root.into(),
            fetcher,
            ledger,
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
        }
    }

    /// Attempts per URL for transient failures. At least one.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn save_root(&self) -> &Path {
        &self.save_root
    }

    async fn prepare_bucket(&self) -> Result<(NaiveDate, PathBuf), ArchiveError> {
        let date = Local::now().date_naive();
        let dir = self.save_root.join(date.format("%Y-%m-%d").to_string());
        ensure_dir(&dir).await?;
        Ok((date, dir))
    }

    /// Fetch the media of every post in `urls`, in input order.
    ///
    /// Posts already in the ledger are skipped without invoking the fetcher.
    /// A post is marked only when the fetcher finished cleanly, whether it
    /// produced new files or reported nothing left to fetch. Per-URL errors end up in
    /// [`FetchReport::failures`] and never stop the rest of the batch.
    ///
    /// # Errors
    ///
    /// Only fails as a whole if the destination directory cannot be prepared.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<FetchReport, ArchiveError> {
        let (date, dir) = self.prepare_bucket().await?;
        let known = self.ledger.snapshot().await;
        let mut report = FetchReport::default();

        let mut in_batch = HashSet::new();
        let mut pending: Vec<(&String, PostId)> = Vec::new();
        for url in urls {
            let id = match extract_post_id(url) {
                Ok(id) => id,
                Err(e) => {
                    warn!(url = %url, "Skipping URL without a post id");
                    report.failures.push(UrlFailure {
                        url: url.clone(),
                        error: e,
                    });
                    continue;
                }
            };
            if known.contains(&id) || !in_batch.insert(id.clone()) {
                debug!(url = %url, post_id = %id, "Already archived, skipping");
                report.skipped_count += 1;
                continue;
            }
            pending.push((url, id));
        }

        info!(
            total = urls.len(),
            pending = pending.len(),
            skipped = report.skipped_count,
            "Fetching posts"
        );

        for (url, id) in pending {
            let attempted = match self
                .fetch_with_retries(url, &dir, Some(TWITTER_FILENAME_TEMPLATE))
                .await
            {
                Ok(attempted) => attempted,
                Err(e) => {
                    error!(url = %url, error = %e, "Fetch failed");
                    report.failures.push(UrlFailure {
                        url: url.clone(),
                        error: e,
                    });
                    continue;
                }
            };

            let produced = !attempted.files.is_empty();
            report.saved.extend(records(url, &attempted.files, date));

            // Files from a fetch that never finished cleanly may be an
            // incomplete set, so the post stays unmarked.
            if !attempted.outcome.is_terminal_ok() {
                report
                    .failures
                    .push(transient_failure(url, &attempted));
                continue;
            }

            match self.ledger.mark_downloaded([id.clone()]).await {
                Ok(_) => {
                    if !produced {
                        debug!(url = %url, post_id = %id, "Nothing new to fetch, marked complete");
                        report.already_complete_count += 1;
                    }
                }
                Err(e) => {
                    error!(url = %url, post_id = %id, error = %e, "Could not record post in ledger");
                    report.failures.push(UrlFailure {
                        url: url.clone(),
                        error: e,
                    });
                }
            }
        }

        info!(
            saved = report.saved.len(),
            skipped = report.skipped_count,
            already_complete = report.already_complete_count,
            failed = report.failures.len(),
            "Batch finished"
        );
        Ok(report)
    }

    /// Fetch standalone links (artwork pages and the like) without ledger pruning.
    ///
    /// A URL whose attempts all failed is reported as a failure, alongside any
    /// complete files it left behind.
    ///
    /// # Errors
    ///
    /// Only fails as a whole if the destination directory cannot be prepared.
    pub async fn fetch_direct(&self, urls: &[String]) -> Result<FetchReport, ArchiveError> {
        let (date, dir) = self.prepare_bucket().await?;
        let mut report = FetchReport::default();

        for url in urls {
            match self.fetch_with_retries(url, &dir, None).await {
                Ok(attempted) => {
                    report.saved.extend(records(url, &attempted.files, date));
                    if !attempted.outcome.is_terminal_ok() {
                        report.failures.push(transient_failure(url, &attempted));
                    } else if attempted.files.is_empty() {
                        report.already_complete_count += 1;
                    }
                }
                Err(e) => {
                    error!(url = %url, error = %e, "Direct fetch failed");
                    report.failures.push(UrlFailure {
                        url: url.clone(),
                        error: e,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Crawl a user media page, excluding every post the ledger already knows.
    ///
    /// Post ids are recovered from the completed filenames and marked. A post
    /// with an unfinished download left in the bucket stays unmarked. Files
    /// whose names carry no id are still reported as saved.
    ///
    /// # Errors
    ///
    /// Fails on a fetch timeout, an unavailable fetcher, a directory error, or
    /// a ledger write failure. Posts completed before a timeout are marked
    /// first. A non-terminal exit is recorded in the report.
    pub async fn fetch_user_media_page(&self, url: &str) -> Result<FetchReport, ArchiveError> {
        let (date, dir) = self.prepare_bucket().await?;
        let known = self.ledger.snapshot().await;
        let mut report = FetchReport::default();

        info!(url = %url, known = known.len(), "Fetching user media page");

        let before = snapshot_dir(&dir).await?;
        let result = self
            .fetcher
            .fetch_user_media(url, &dir, TWITTER_FILENAME_TEMPLATE, &known)
            .await;
        let after = snapshot_dir(&dir).await?;
        let files = new_entries(&before, &after);

        let unfinished: BTreeSet<PostId> = new_partial_entries(&before, &after)
            .iter()
            .filter_map(|path| path.file_stem().and_then(|stem| stem.to_str()))
            .filter_map(post_id_from_filename)
            .collect();
        let ids: BTreeSet<PostId> = files
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .filter_map(post_id_from_filename)
            .filter(|id| !unfinished.contains(id))
            .collect();
        let newly_marked = self.ledger.mark_downloaded(ids).await?;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(url = %url, files = files.len(), newly_marked, error = %e, "User media fetch aborted");
                return Err(e);
            }
        };

        if let FetchOutcome::Error { code, message } = &outcome {
            error!(url = %url, code = ?code, "User media fetch did not finish cleanly");
            report.failures.push(UrlFailure {
                url: url.to_string(),
                error: ArchiveError::FetchTransientError {
                    url: url.to_string(),
                    attempts: 1,
                    message: message.clone(),
                },
            });
        }

        info!(url = %url, files = files.len(), newly_marked, "User media page finished");
        report.saved = records(url, &files, date).collect();
        Ok(report)
    }

    /// Run single-post fetches until a terminal outcome or the attempt budget
    /// runs out. Timeouts and spawn failures end the loop immediately.
    async fn fetch_with_retries(
        &self,
        url: &str,
        dir: &Path,
        filename_template: Option<&str>,
    ) -> Result<Attempted, ArchiveError> {
        let before = snapshot_dir(dir).await?;

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let outcome = self.fetcher.fetch_post(url, dir, filename_template).await?;
            if let FetchOutcome::Error { code, message } = &outcome {
                if attempts < self.max_attempts {
                    warn!(
                        url = %url,
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        code = ?code,
                        stderr = %message,
                        "Fetch attempt failed, retrying"
                    );
                    continue;
                }
                error!(
                    url = %url,
                    attempts,
                    code = ?code,
                    stderr = %message,
                    "Fetch attempts exhausted"
                );
            }
            break outcome;
        };

        let after = snapshot_dir(dir).await?;
        let files = new_entries(&before, &after);
        debug!(url = %url, files = files.len(), outcome = ?outcome, "Fetch finished");

        Ok(Attempted {
            outcome,
            attempts,
            files,
        })
    }
}

fn records<'a>(
    url: &'a str,
    files: &'a [PathBuf],
    date: NaiveDate,
) -> impl Iterator<Item = DownloadRecord> + 'a {
    files.iter().map(move |path| DownloadRecord {
        source_url: url.to_string(),
        saved_path: path.clone(),
        date_bucket: date,
    })
}

fn transient_failure(url: &str, attempted: &Attempted) -> UrlFailure {
    let message = match &attempted.outcome {
        FetchOutcome::Error { message, .. } if !message.is_empty() => message.clone(),
        FetchOutcome::Error { code, .. } => format!("exit code {code:?}"),
        _ => "no files".to_string(),
    };
    UrlFailure {
        url: url.to_string(),
        error: ArchiveError::FetchTransientError {
            url: url.to_string(),
            attempts: attempted.attempts,
            message,
        },
    }
}

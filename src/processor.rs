//! Routes extracted links to the resolver and orchestrator and reports the
//! outcome back to the message source and the activity log.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{error, info, warn};

use crate::archiver::FetchOrchestrator;
use crate::handlers::{extract_links, ExtractedLink, LinkKind, HANDLERS};
use crate::inbox::{InboundMessage, MessageSource, MessageStatus};
use crate::models::MessageRef;
use crate::store::LogStore;
use crate::thread::ThreadResolver;

/// What happened to one message or URL.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub urls: Vec<String>,
    pub file_count: usize,
    pub errors: Vec<String>,
}

impl ProcessOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct Processor {
    resolver: ThreadResolver,
    orchestrator: Arc<FetchOrchestrator>,
    log: Arc<LogStore>,
    source: Option<Arc<dyn MessageSource>>,
}

impl Processor {
    pub fn new(resolver: ThreadResolver, orchestrator: Arc<FetchOrchestrator>, log: Arc<LogStore>) -> Self {
        Self {
            resolver,
            orchestrator,
            log,
            source: None,
        }
    }

    /// Attach the source that statuses are reported to and retries are
    /// fetched from.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MessageSource>) -> Self {
        self.source = Some(source);
        self
    }

    #[must_use]
    pub fn source(&self) -> Option<&Arc<dyn MessageSource>> {
        self.source.as_ref()
    }

    /// Archive one link and return how many files were newly saved.
    ///
    /// A thread that resolves to no posts is not an error. A direct link that
    /// yields no files is.
    pub async fn process_link(&self, link: &ExtractedLink) -> Result<usize> {
        match link.kind {
            LinkKind::UserMedia => {
                let report = self.orchestrator.fetch_user_media_page(&link.url).await?;
                if report.has_failures() {
                    bail!(report.failure_summary());
                }
                if report.saved.is_empty() {
                    info!(url = %link.url, "No new media, everything already archived");
                }
                Ok(report.saved.len())
            }
            LinkKind::Direct => {
                let report = self
                    .orchestrator
                    .fetch_direct(std::slice::from_ref(&link.url))
                    .await?;
                if report.has_failures() {
                    bail!(report.failure_summary());
                }
                if report.saved.is_empty() {
                    bail!("no files downloaded: {}", link.url);
                }
                Ok(report.saved.len())
            }
            LinkKind::Status => {
                let thread = self.resolver.resolve_thread(&link.url).await?;
                if thread.post_urls.is_empty() {
                    info!(url = %link.url, "Thread has no posts to fetch");
                    return Ok(0);
                }
                let report = self.orchestrator.fetch_all(&thread.post_urls).await?;
                if report.has_failures() {
                    bail!(report.failure_summary());
                }
                Ok(report.saved.len())
            }
        }
    }

    async fn process_links(&self, links: &[ExtractedLink]) -> ProcessOutcome {
        let mut outcome = ProcessOutcome {
            urls: links.iter().map(|l| l.url.clone()).collect(),
            ..ProcessOutcome::default()
        };
        for link in links {
            match self.process_link(link).await {
                Ok(count) => outcome.file_count += count,
                Err(e) => {
                    error!(url = %link.url, error = %e, "Link failed");
                    outcome.errors.push(format!("{e:#}"));
                }
            }
        }
        outcome
    }

    /// Archive every link in a message and report the result.
    ///
    /// Errors are collected per link; one failing link never stops the others.
    pub async fn process_message(&self, message: &InboundMessage) -> ProcessOutcome {
        let links = extract_links(&message.text);
        let reference = &message.reference;
        info!(message = %reference, links = links.len(), "Processing message");

        self.report_status(reference, MessageStatus::Processing).await;
        let outcome = self.process_links(&links).await;

        if outcome.is_success() {
            self.report_status(reference, MessageStatus::Done).await;
            if let Err(e) = self
                .log
                .append_success(Some(reference), &outcome.urls, outcome.file_count)
                .await
            {
                warn!(error = %e, "Failed to append to activity log");
            }
            info!(message = %reference, files = outcome.file_count, "Message archived");
        } else {
            self.report_status(reference, MessageStatus::Failed).await;
            if let Err(e) = self
                .log
                .append_failure(Some(reference), &outcome.urls, &outcome.errors.join("; "))
                .await
            {
                warn!(error = %e, "Failed to append to activity log");
            }
            warn!(message = %reference, errors = ?outcome.errors, "Message failed");
        }
        outcome
    }

    /// Archive a URL that arrived without a message to acknowledge.
    pub async fn process_url(&self, url: &str) -> ProcessOutcome {
        let Some(link) = HANDLERS.classify(url) else {
            warn!(url = %url, "Unsupported URL");
            let outcome = ProcessOutcome {
                urls: vec![url.to_string()],
                file_count: 0,
                errors: vec![format!("unsupported url: {url}")],
            };
            self.log_url_outcome(&outcome).await;
            return outcome;
        };

        let outcome = self.process_links(std::slice::from_ref(&link)).await;
        self.log_url_outcome(&outcome).await;
        outcome
    }

    async fn log_url_outcome(&self, outcome: &ProcessOutcome) {
        let result = if outcome.is_success() {
            self.log
                .append_success(None, &outcome.urls, outcome.file_count)
                .await
        } else {
            self.log
                .append_failure(None, &outcome.urls, &outcome.errors.join("; "))
                .await
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to append to activity log");
        }
    }

    /// Process every backlog message of the attached source that has links.
    /// Returns how many messages were processed.
    pub async fn scan_pending(&self) -> Result<usize> {
        let Some(source) = &self.source else {
            return Ok(0);
        };
        let messages = source.pending_messages().await?;
        let mut processed = 0;
        for message in messages {
            if extract_links(&message.text).is_empty() {
                continue;
            }
            info!(message = %message.reference, "Found unprocessed message");
            self.process_message(&message).await;
            processed += 1;
        }
        Ok(processed)
    }

    async fn report_status(&self, reference: &MessageRef, status: MessageStatus) {
        let Some(source) = &self.source else {
            return;
        };
        if source.name() != reference.source {
            return;
        }
        if let Err(e) = source.set_status(reference, status).await {
            warn!(message = %reference, error = %e, "Failed to update message status");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::archiver::{FetchOutcome, MediaFetcher, PostInfo, PostInfoSource};
    use crate::error::ArchiveError;
    use crate::inbox::LocalInbox;
    use crate::ledger::DedupLedger;
    use crate::models::PostId;
    use crate::store::LogStatus;

    /// Saves one file per post; imgur links never produce anything.
    struct StubFetcher;

    #[async_trait]
    impl MediaFetcher for StubFetcher {
        async fn fetch_post(
            &self,
            url: &str,
            dest: &Path,
            _filename_template: Option<&str>,
        ) -> Result<FetchOutcome, ArchiveError> {
            if url.contains("imgur") {
                return Ok(FetchOutcome::NothingToFetch);
            }
            let name = url.rsplit('/').next().unwrap_or("x");
            tokio::fs::write(dest.join(format!("a-{name}-01.jpg")), b"img")
                .await
                .unwrap();
            Ok(FetchOutcome::Success)
        }

        async fn fetch_user_media(
            &self,
            _url: &str,
            _dest: &Path,
            _filename_template: &str,
            _known: &BTreeSet<PostId>,
        ) -> Result<FetchOutcome, ArchiveError> {
            Ok(FetchOutcome::NothingToFetch)
        }
    }

    /// Every post is a thread root by the same author; post 13 cannot be looked up.
    struct StubInfo;

    #[async_trait]
    impl PostInfoSource for StubInfo {
        async fn post_info(&self, url: &str) -> Result<PostInfo, ArchiveError> {
            if url.ends_with("/13") {
                return Err(ArchiveError::MetadataFetchError {
                    url: url.to_string(),
                    message: "gone".to_string(),
                });
            }
            Ok(PostInfo {
                parent_id: None,
                author_name: Some("a".to_string()),
            })
        }
    }

    async fn setup() -> (TempDir, Arc<LocalInbox>, Processor) {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(
            DedupLedger::open(temp.path().join("_downloaded_ids.json"))
                .await
                .unwrap(),
        );
        let orchestrator = Arc::new(FetchOrchestrator::new(
            temp.path().join("media"),
            Arc::new(StubFetcher),
            ledger,
        ));
        let log = Arc::new(LogStore::new(temp.path()));
        let inbox = Arc::new(LocalInbox::new(temp.path().join("inbox")));
        let processor = Processor::new(ThreadResolver::new(Arc::new(StubInfo)), orchestrator, log)
            .with_source(inbox.clone());
        (temp, inbox, processor)
    }

    fn message(id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            reference: MessageRef {
                source: "inbox".to_string(),
                message_id: id.to_string(),
            },
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_message_success_is_logged_and_marked_done() {
        let (_temp, inbox, processor) = setup().await;
        let msg = message("a.txt", "see https://x.com/a/status/10 and https://www.pixiv.net/artworks/5");

        let outcome = processor.process_message(&msg).await;

        assert!(outcome.is_success(), "{:?}", outcome.errors);
        assert_eq!(outcome.file_count, 2);
        assert_eq!(inbox.status(&msg.reference).await.unwrap(), Some(MessageStatus::Done));
        let logs = processor.log.recent_logs(10).await;
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].file_count, Some(2));
    }

    #[tokio::test]
    async fn test_failing_link_does_not_stop_siblings() {
        let (_temp, inbox, processor) = setup().await;
        let msg = message(
            "b.txt",
            "https://x.com/a/status/13 https://i.imgur.com/x.png https://x.com/a/status/14",
        );

        let outcome = processor.process_message(&msg).await;

        assert_eq!(outcome.file_count, 1);
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome.errors[1].contains("no files downloaded"));
        assert_eq!(inbox.status(&msg.reference).await.unwrap(), Some(MessageStatus::Failed));
        assert_eq!(processor.log.failures().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_saves_nothing_but_succeeds() {
        let (_temp, _inbox, processor) = setup().await;
        let msg = message("c.txt", "https://x.com/a/status/20");

        assert_eq!(processor.process_message(&msg).await.file_count, 1);
        let again = processor.process_message(&msg).await;
        assert!(again.is_success());
        assert_eq!(again.file_count, 0);
    }

    #[tokio::test]
    async fn test_process_url_rejects_unsupported() {
        let (_temp, _inbox, processor) = setup().await;

        let outcome = processor.process_url("https://example.com/page").await;
        assert!(!outcome.is_success());

        let ok = processor.process_url("https://x.com/a/status/30").await;
        assert_eq!(ok.file_count, 1);
        let logs = processor.log.recent_logs(10).await;
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.is_none());
    }

    #[tokio::test]
    async fn test_scan_pending_skips_messages_without_links() {
        let (temp, inbox, processor) = setup().await;
        let dir = temp.path().join("inbox");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("1.txt"), "https://x.com/a/status/40").await.unwrap();
        tokio::fs::write(dir.join("2.txt"), "no links here").await.unwrap();

        assert_eq!(processor.scan_pending().await.unwrap(), 1);
        assert_eq!(processor.scan_pending().await.unwrap(), 0);
        assert_eq!(inbox.status(&message("2.txt", "").reference).await.unwrap(), None);
    }
}

//! Background loop draining the retry and API queues into the processor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::models::{MessageRef, WorkItem};
use crate::processor::Processor;
use crate::store::LogStore;

/// Counts from one scheduler tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Backlog messages processed by a periodic scan.
    pub scanned: usize,
    /// Retry-queue messages processed.
    pub retried: usize,
    /// Retry-queue messages that could not be loaded.
    pub missing: usize,
    /// API-queue URLs processed.
    pub urls: usize,
}

pub struct Scheduler {
    processor: Arc<Processor>,
    log: Arc<LogStore>,
    poll_interval: Duration,
    scan_interval: Option<Duration>,
    last_scan: Instant,
}

impl Scheduler {
    pub fn new(processor: Arc<Processor>, log: Arc<LogStore>, poll_interval: Duration) -> Self {
        Self {
            processor,
            log,
            poll_interval,
            scan_interval: None,
            last_scan: Instant::now(),
        }
    }

    /// Re-scan the source backlog whenever this much time has passed.
    /// `None` disables periodic scans.
    #[must_use]
    pub fn with_scan_interval(mut self, scan_interval: Option<Duration>) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    /// Run forever, ticking once per poll interval.
    pub async fn run(mut self) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            scan_interval_secs = self.scan_interval.map(|d| d.as_secs()),
            "Scheduler started"
        );

        loop {
            tokio::time::sleep(self.poll_interval).await;
            match self.tick().await {
                Ok(summary) if summary != TickSummary::default() => {
                    info!(?summary, "Scheduler tick finished");
                }
                Ok(_) => debug!("Scheduler tick found no work"),
                Err(e) => error!(error = %e, "Scheduler tick failed"),
            }
        }
    }

    /// One pass: optional backlog scan, then the retry queue, then the API queue.
    pub async fn tick(&mut self) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        if let Some(interval) = self.scan_interval {
            if self.last_scan.elapsed() >= interval {
                self.last_scan = Instant::now();
                info!(interval_secs = interval.as_secs(), "Starting periodic backlog scan");
                match self.processor.scan_pending().await {
                    Ok(count) => summary.scanned = count,
                    Err(e) => warn!(error = %e, "Backlog scan failed"),
                }
            }
        }

        let mut work: Vec<WorkItem> = self
            .log
            .pop_retry_queue()
            .await?
            .into_iter()
            .map(WorkItem::Message)
            .collect();
        work.extend(self.log.pop_api_queue().await?.into_iter().map(WorkItem::Url));

        for item in work {
            match item {
                WorkItem::Message(reference) => {
                    if self.retry_message(&reference).await {
                        summary.retried += 1;
                    } else {
                        summary.missing += 1;
                    }
                }
                WorkItem::Url(url) => {
                    info!(url = %url, "Processing queued URL");
                    self.processor.process_url(&url).await;
                    summary.urls += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Re-run a queued message through the live path. `false` if it could
    /// not be loaded.
    async fn retry_message(&self, reference: &MessageRef) -> bool {
        let Some(source) = self.processor.source() else {
            warn!(message = %reference, "No message source attached, dropping retry");
            return false;
        };
        match source.fetch_message(reference).await {
            Ok(Some(message)) => {
                info!(message = %reference, "Retrying message");
                self.processor.process_message(&message).await;
                true
            }
            Ok(None) => {
                warn!(message = %reference, "Retry target no longer exists");
                false
            }
            Err(e) => {
                error!(message = %reference, error = %e, "Failed to load retry target");
                false
            }
        }
    }
}

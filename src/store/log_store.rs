use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::MAX_LOG_ENTRIES;
use crate::fs_utils::write_atomic;
use crate::models::MessageRef;

const LOG_FILE: &str = "_download_log.json";
const RETRY_FILE: &str = "_retry_queue.json";
const API_QUEUE_FILE: &str = "_api_queue.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

/// One processed message or URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub status: LogStatus,
    /// Absent for URLs submitted through the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageRef>,
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    fn key(&self) -> String {
        self.message
            .as_ref()
            .map_or_else(|| self.urls.join(" "), ToString::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUrl {
    pub url: String,
    pub queued_at: DateTime<Utc>,
}

/// JSON-file backed log and queues under the save directory.
///
/// Every read-modify-write holds one async lock, and every write goes through
/// a temp file and rename. Unreadable files are logged and treated as empty.
#[derive(Debug)]
pub struct LogStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn append_success(
        &self,
        message: Option<&MessageRef>,
        urls: &[String],
        file_count: usize,
    ) -> Result<()> {
        self.append(LogEntry {
            ts: Utc::now(),
            status: LogStatus::Success,
            message: message.cloned(),
            urls: urls.to_vec(),
            file_count: Some(file_count),
            error: None,
        })
        .await
    }

    pub async fn append_failure(
        &self,
        message: Option<&MessageRef>,
        urls: &[String],
        error: &str,
    ) -> Result<()> {
        self.append(LogEntry {
            ts: Utc::now(),
            status: LogStatus::Failure,
            message: message.cloned(),
            urls: urls.to_vec(),
            file_count: None,
            error: Some(error.to_string()),
        })
        .await
    }

    async fn append(&self, entry: LogEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(LOG_FILE);
        let mut logs: Vec<LogEntry> = read_json(&path).await;
        logs.push(entry);
        if logs.len() > MAX_LOG_ENTRIES {
            let excess = logs.len() - MAX_LOG_ENTRIES;
            logs.drain(..excess);
        }
        write_json(&path, &logs).await
    }

    /// Up to `limit` entries, newest first.
    pub async fn recent_logs(&self, limit: usize) -> Vec<LogEntry> {
        let _guard = self.lock.lock().await;
        let logs: Vec<LogEntry> = read_json(&self.dir.join(LOG_FILE)).await;
        logs.into_iter().rev().take(limit).collect()
    }

    /// Entries whose message (or URL set, for API submissions) most recently failed.
    pub async fn failures(&self) -> Vec<LogEntry> {
        let _guard = self.lock.lock().await;
        let logs: Vec<LogEntry> = read_json(&self.dir.join(LOG_FILE)).await;

        let mut seen = HashSet::new();
        logs.into_iter()
            .rev()
            .filter(|entry| seen.insert(entry.key()))
            .filter(|entry| entry.status == LogStatus::Failure)
            .collect()
    }

    /// Queue a message for the scheduler's next retry drain. Returns `false`
    /// if it was already queued.
    pub async fn queue_retry(&self, message: &MessageRef) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(RETRY_FILE);
        let mut queue: Vec<MessageRef> = read_json(&path).await;
        if queue.contains(message) {
            return Ok(false);
        }
        queue.push(message.clone());
        write_json(&path, &queue).await?;
        debug!(message = %message, "Queued message for retry");
        Ok(true)
    }

    /// Take every queued retry, leaving the queue empty.
    pub async fn pop_retry_queue(&self) -> Result<Vec<MessageRef>> {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(RETRY_FILE);
        let queue: Vec<MessageRef> = read_json(&path).await;
        if !queue.is_empty() {
            write_json(&path, &Vec::<MessageRef>::new()).await?;
        }
        Ok(queue)
    }

    /// Queue a URL submitted without a message. Returns `false` if it was
    /// already queued.
    pub async fn queue_url(&self, url: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(API_QUEUE_FILE);
        let mut queue: Vec<QueuedUrl> = read_json(&path).await;
        if queue.iter().any(|q| q.url == url) {
            return Ok(false);
        }
        queue.push(QueuedUrl {
            url: url.to_string(),
            queued_at: Utc::now(),
        });
        write_json(&path, &queue).await?;
        debug!(url = %url, "Queued URL");
        Ok(true)
    }

    /// Take every queued URL in submission order, leaving the queue empty.
    pub async fn pop_api_queue(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let path = self.dir.join(API_QUEUE_FILE);
        let queue: Vec<QueuedUrl> = read_json(&path).await;
        if !queue.is_empty() {
            write_json(&path, &Vec::<QueuedUrl>::new()).await?;
        }
        Ok(queue.into_iter().map(|q| q.url).collect())
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read store file");
            return T::default();
        }
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Store file is corrupt, starting empty");
        T::default()
    })
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).context("Failed to serialize store file")?;
    write_atomic(path, &data)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn msg(id: &str) -> MessageRef {
        MessageRef {
            source: "inbox".to_string(),
            message_id: id.to_string(),
        }
    }

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_recent_logs_newest_first() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path());

        store
            .append_success(Some(&msg("1")), &urls(&["https://x.com/a/status/1"]), 2)
            .await
            .unwrap();
        store
            .append_failure(None, &urls(&["https://x.com/a/status/2"]), "boom")
            .await
            .unwrap();

        let logs = store.recent_logs(10).await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, LogStatus::Failure);
        assert_eq!(logs[0].error.as_deref(), Some("boom"));
        assert_eq!(logs[1].file_count, Some(2));
        assert_eq!(store.recent_logs(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_log_is_capped() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path());

        for i in 0..(MAX_LOG_ENTRIES + 5) {
            store
                .append_success(Some(&msg(&i.to_string())), &[], 1)
                .await
                .unwrap();
        }

        let logs = store.recent_logs(usize::MAX).await;
        assert_eq!(logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(
            logs[0].message.as_ref().unwrap().message_id,
            (MAX_LOG_ENTRIES + 4).to_string()
        );
    }

    #[tokio::test]
    async fn test_failures_only_reports_latest_outcome() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path());

        store.append_failure(Some(&msg("1")), &[], "first").await.unwrap();
        store.append_success(Some(&msg("1")), &[], 1).await.unwrap();
        store.append_failure(Some(&msg("2")), &[], "old").await.unwrap();
        store.append_failure(Some(&msg("2")), &[], "new").await.unwrap();

        let failures = store.failures().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_retry_queue_dedupes_and_drains() {
        let temp = TempDir::new().unwrap();
        let store = LogStore::new(temp.path());

        assert!(store.queue_retry(&msg("1")).await.unwrap());
        assert!(!store.queue_retry(&msg("1")).await.unwrap());
        assert!(store.queue_retry(&msg("2")).await.unwrap());

        assert_eq!(store.pop_retry_queue().await.unwrap(), vec![msg("1"), msg("2")]);
        assert!(store.pop_retry_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_api_queue_survives_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let store = LogStore::new(temp.path());
            store.queue_url("https://x.com/a/status/1").await.unwrap();
            store.queue_url("https://x.com/a/status/1").await.unwrap();
            store.queue_url("https://x.com/a/status/2").await.unwrap();
        }

        let store = LogStore::new(temp.path());
        assert_eq!(
            store.pop_api_queue().await.unwrap(),
            urls(&["https://x.com/a/status/1", "https://x.com/a/status/2"])
        );
        assert!(store.pop_api_queue().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let temp = TempDir::new().unwrap();
        tokio::fs::write(temp.path().join(RETRY_FILE), "not json")
            .await
            .unwrap();

        let store = LogStore::new(temp.path());
        assert!(store.pop_retry_queue().await.unwrap().is_empty());
        assert!(store.queue_retry(&msg("1")).await.unwrap());
    }
}

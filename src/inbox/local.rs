use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{InboundMessage, MessageSource, MessageStatus};
use crate::fs_utils::write_atomic;
use crate::models::MessageRef;

const SOURCE_NAME: &str = "inbox";
const STATUS_FILE: &str = ".x-keeper-status.json";
const NOTE_EXTENSIONS: &[&str] = &["txt", "md"];

/// A directory of plain-text notes, one message per file.
///
/// The file name is the message id. Statuses live in a hidden sidecar JSON
/// file so the notes themselves are never rewritten.
#[derive(Debug)]
pub struct LocalInbox {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LocalInbox {
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

    fn reference(name: &str) -> MessageRef {
        MessageRef {
            source: SOURCE_NAME.to_string(),
            message_id: name.to_string(),
        }
    }

    /// Notes that have never been given a status.
    pub async fn unseen_messages(&self) -> Result<Vec<InboundMessage>> {
        let statuses = self.load_statuses().await?;
        self.collect(|name| !statuses.contains_key(name)).await
    }

    pub async fn status(&self, reference: &MessageRef) -> Result<Option<MessageStatus>> {
        Ok(self
            .load_statuses()
            .await?
            .get(&reference.message_id)
            .copied())
    }

    async fn collect(&self, keep: impl Fn(&str) -> bool) -> Result<Vec<InboundMessage>> {
        let mut messages = Vec::new();
        for name in self.note_names().await? {
            if !keep(&name) {
                continue;
            }
            if let Some(message) = self.read_note(&name).await? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    async fn note_names(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_note = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| NOTE_EXTENSIONS.contains(&ext));
            if !is_note || !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_note(&self, name: &str) -> Result<Option<InboundMessage>> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Ok(None);
        }
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(InboundMessage {
                reference: Self::reference(name),
                text,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read note {}", path.display())),
        }
    }

    /// A missing sidecar means no note has a status yet. A corrupt one is an
    /// error, so it is never overwritten with an empty map.
    async fn load_statuses(&self) -> Result<BTreeMap<String, MessageStatus>> {
        let path = self.dir.join(STATUS_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        serde_json::from_slice(&bytes).with_context(|| {
            format!(
                "Inbox status file {} is corrupt; fix or remove it",
                path.display()
            )
        })
    }
}

#[async_trait]
impl MessageSource for LocalInbox {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn pending_messages(&self) -> Result<Vec<InboundMessage>> {
        let statuses = self.load_statuses().await?;
        self.collect(|name| statuses.get(name) != Some(&MessageStatus::Done))
            .await
    }

    async fn fetch_message(&self, reference: &MessageRef) -> Result<Option<InboundMessage>> {
        if reference.source != SOURCE_NAME {
            return Ok(None);
        }
        self.read_note(&reference.message_id).await
    }

    async fn set_status(&self, reference: &MessageRef, status: MessageStatus) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut statuses = self.load_statuses().await?;
        statuses.insert(reference.message_id.clone(), status);

        let data = serde_json::to_vec_pretty(&statuses).context("Failed to serialize inbox status")?;
        let path = self.dir.join(STATUS_FILE);
        write_atomic(&path, &data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(message = %reference, status = ?status, "Message status updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn inbox_with(notes: &[(&str, &str)]) -> (TempDir, LocalInbox) {
        let temp = TempDir::new().unwrap();
        for (name, text) in notes {
            tokio::fs::write(temp.path().join(name), text).await.unwrap();
        }
        let inbox = LocalInbox::new(temp.path());
        (temp, inbox)
    }

    #[tokio::test]
    async fn test_lists_only_note_files() {
        let (_temp, inbox) = inbox_with(&[
            ("b.txt", "https://x.com/a/status/1"),
            ("a.md", "hello"),
            ("image.jpg", "binary"),
        ])
        .await;

        let pending = inbox.pending_messages().await.unwrap();
        let ids: Vec<_> = pending
            .iter()
            .map(|m| m.reference.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a.md", "b.txt"]);
        assert_eq!(pending[1].text, "https://x.com/a/status/1");
        assert_eq!(pending[1].reference.source, "inbox");
    }

    #[tokio::test]
    async fn test_status_tracking() {
        let (_temp, inbox) = inbox_with(&[("a.txt", "one"), ("b.txt", "two"), ("c.txt", "three")]).await;

        inbox
            .set_status(&LocalInbox::reference("a.txt"), MessageStatus::Done)
            .await
            .unwrap();
        inbox
            .set_status(&LocalInbox::reference("b.txt"), MessageStatus::Failed)
            .await
            .unwrap();

        let pending: Vec<_> = inbox
            .pending_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.reference.message_id)
            .collect();
        assert_eq!(pending, vec!["b.txt", "c.txt"]);

        let unseen: Vec<_> = inbox
            .unseen_messages()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.reference.message_id)
            .collect();
        assert_eq!(unseen, vec!["c.txt"]);
        assert_eq!(
            inbox.status(&LocalInbox::reference("b.txt")).await.unwrap(),
            Some(MessageStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_fetch_message() {
        let (_temp, inbox) = inbox_with(&[("a.txt", "one")]).await;

        let found = inbox
            .fetch_message(&LocalInbox::reference("a.txt"))
            .await
            .unwrap();
        assert_eq!(found.unwrap().text, "one");

        assert!(inbox
            .fetch_message(&LocalInbox::reference("gone.txt"))
            .await
            .unwrap()
            .is_none());
        assert!(inbox
            .fetch_message(&LocalInbox::reference("../a.txt"))
            .await
            .unwrap()
            .is_none());

        let other_source = MessageRef {
            source: "discord".to_string(),
            message_id: "a.txt".to_string(),
        };
        assert!(inbox.fetch_message(&other_source).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let inbox = LocalInbox::new(temp.path().join("absent"));
        assert!(inbox.pending_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_status_file_is_kept() {
        let (temp, inbox) = inbox_with(&[("a.txt", "one")]).await;
        let sidecar = temp.path().join(STATUS_FILE);
        tokio::fs::write(&sidecar, b"{not json").await.unwrap();

        assert!(inbox.unseen_messages().await.is_err());
        assert!(inbox.pending_messages().await.is_err());
        assert!(inbox
            .set_status(&LocalInbox::reference("a.txt"), MessageStatus::Done)
            .await
            .is_err());
        assert_eq!(tokio::fs::read(&sidecar).await.unwrap(), b"{not json");
    }
}

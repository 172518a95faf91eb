//! Persisted set of post ids whose media is already archived.
//!
//! Membership only grows. An id is added only after the orchestrator has
//! confirmed its files are on disk, and the file is rewritten atomically
//! before the in-memory set reports the id as present.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::constants::SUBSCRIBER_BUFFER;
use crate::error::ArchiveError;
use crate::fs_utils::write_atomic;
use crate::models::PostId;

pub type SubscriptionId = u64;

/// Receives batches of newly archived ids.
///
/// Dropping the subscription unsubscribes it on the next notification.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<Vec<PostId>>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next batch. `None` once the ledger dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Vec<PostId>> {
        self.rx.recv().await
    }

    /// Take a pending batch without waiting.
    pub fn try_recv(&mut self) -> Option<Vec<PostId>> {
        self.rx.try_recv().ok()
    }
}

/// Dedup ledger backed by a JSON array file.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    ids: RwLock<BTreeSet<PostId>>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::Sender<Vec<PostId>>>>,
    next_subscriber: AtomicU64,
}

impl DedupLedger {
    /// Open the ledger at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::LedgerIo`] if the file exists but cannot be
    /// read or does not hold a JSON array of ids.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let ids = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeSet::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<PostId>>(&bytes)
                .map_err(|e| {
                    ArchiveError::ledger_io(
                        &path,
                        std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    )
                })?
                .into_iter()
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(ArchiveError::ledger_io(&path, e)),
        };

        info!(path = %path.display(), count = ids.len(), "Dedup ledger loaded");

        Ok(Self {
            path,
            ids: RwLock::new(ids),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, id: &PostId) -> bool {
        self.ids.read().await.contains(id)
    }

    /// Copy of the current membership.
    pub async fn snapshot(&self) -> BTreeSet<PostId> {
        self.ids.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }

    /// Record `ids` as archived and return how many were new.
    ///
    /// Re-marking known ids is a no-op. Concurrent calls are serialized, so
    /// each id is reported as new by exactly one call, and only that call
    /// notifies subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::LedgerIo`] if the file cannot be written. The
    /// in-memory set is rolled back so no id is reported without being durable.
    pub async fn mark_downloaded<I>(&self, ids: I) -> Result<usize, ArchiveError>
    where
        I: IntoIterator<Item = PostId>,
    {
        let mut set = self.ids.write().await;

        let mut seen = HashSet::new();
        let added: Vec<PostId> = ids
            .into_iter()
            .filter(|id| !set.contains(id) && seen.insert(id.clone()))
            .collect();
        if added.is_empty() {
            return Ok(0);
        }

        set.extend(added.iter().cloned());
        if let Err(e) = persist(&self.path, &set).await {
            for id in &added {
                set.remove(id);
            }
            return Err(e);
        }
        drop(set);

        debug!(count = added.len(), "Marked posts as downloaded");
        self.notify(&added);
        Ok(added.len())
    }

    /// Subscribe to future batches of newly added ids.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_buffer(SUBSCRIBER_BUFFER)
    }

    /// Subscribe with a custom buffer size. A subscriber whose buffer is full
    /// when a batch arrives is dropped.
    pub fn subscribe_with_buffer(&self, buffer: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, added: &[PostId]) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|id, tx| match tx.try_send(added.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = id, "Ledger subscriber is not keeping up, dropping it");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "Ledger subscriber went away");
                false
            }
        });
    }
}

async fn persist(path: &Path, ids: &BTreeSet<PostId>) -> Result<(), ArchiveError> {
    let data = serde_json::to_vec(ids).map_err(|e| {
        ArchiveError::ledger_io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    write_atomic(path, &data)
        .await
        .map_err(|e| ArchiveError::ledger_io(path, e))
}

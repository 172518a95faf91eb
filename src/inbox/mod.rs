//! Sources of messages that may contain links to archive.

mod local;
mod watch;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::MessageRef;

pub use local::LocalInbox;
pub use watch::watch;

/// Processing state reported back to a message's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub reference: MessageRef,
    pub text: String,
}

/// A place messages arrive in, such as a chat channel or a note store.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Name stored in [`MessageRef::source`].
    fn name(&self) -> &str;

    /// Backlog of messages not yet marked [`MessageStatus::Done`].
    async fn pending_messages(&self) -> Result<Vec<InboundMessage>>;

    /// Look up one message. `Ok(None)` if it no longer exists.
    async fn fetch_message(&self, reference: &MessageRef) -> Result<Option<InboundMessage>>;

    async fn set_status(&self, reference: &MessageRef, status: MessageStatus) -> Result<()>;
}

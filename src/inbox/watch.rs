use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{LocalInbox, MessageSource, MessageStatus};
use crate::handlers::extract_links;
use crate::processor::Processor;

/// Pick up new notes as they land in the inbox.
///
/// Each note with links is marked [`MessageStatus::Processing`] and handed to
/// its own task, so a long download never delays the next note. Runs until
/// the task is aborted.
pub async fn watch(inbox: Arc<LocalInbox>, processor: Arc<Processor>, interval: Duration) {
    info!(dir = %inbox.dir().display(), interval_secs = interval.as_secs(), "Watching inbox");
    let mut seen = HashSet::new();

    loop {
        match inbox.unseen_messages().await {
            Ok(messages) => {
                for message in messages {
                    if !seen.insert(message.reference.message_id.clone()) {
                        continue;
                    }
                    if extract_links(&message.text).is_empty() {
                        debug!(message = %message.reference, "Note has no supported links");
                        continue;
                    }
                    if let Err(e) = inbox
                        .set_status(&message.reference, MessageStatus::Processing)
                        .await
                    {
                        warn!(message = %message.reference, error = %e, "Failed to claim note");
                    }
                    let processor = Arc::clone(&processor);
                    tokio::spawn(async move {
                        processor.process_message(&message).await;
                    });
                }
            }
            Err(e) => warn!(error = %e, "Failed to list inbox"),
        }

        tokio::time::sleep(interval).await;
    }
}

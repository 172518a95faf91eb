//! Activity log and persisted work queues.

mod log_store;

pub use log_store::{LogEntry, LogStatus, LogStore, QueuedUrl};

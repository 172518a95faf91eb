//! x-keeper library.
//!
//! Watches message sources for social-media links and archives their media to
//! local disk with gallery-dl, reconstructing self-reply threads and never
//! downloading an already archived post twice.

pub mod archiver;
pub mod config;
pub mod constants;
pub mod error;
pub mod fs_utils;
pub mod handlers;
pub mod inbox;
pub mod ledger;
pub mod models;
pub mod processor;
pub mod scheduler;
pub mod store;
pub mod thread;
pub mod web;

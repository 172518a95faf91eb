//! Media fetching: the gallery-dl capability and the orchestrator driving it.

pub mod gallerydl;
pub mod orchestrator;
pub mod traits;

pub use gallerydl::GalleryDl;
pub use orchestrator::FetchOrchestrator;
pub use traits::{FetchOutcome, MediaFetcher, PostInfo, PostInfoSource};

mod registry;
mod traits;

// Site handlers
mod imgur;
mod pixiv;
pub mod twitter;

pub use registry::HandlerRegistry;
pub use traits::{ExtractedLink, LinkKind, SiteHandler};
pub use twitter::{extract_post_id, post_id_from_filename, status_url_for};

/// Global handler registry.
pub static HANDLERS: std::sync::LazyLock<HandlerRegistry> = std::sync::LazyLock::new(|| {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(twitter::TwitterMediaHandler::new()));
    registry.register(Box::new(twitter::TwitterStatusHandler::new()));
    registry.register(Box::new(pixiv::PixivHandler::new()));
    registry.register(Box::new(imgur::ImgurHandler::new()));
    registry
});

/// Extract every supported link from free text using the global registry.
#[must_use]
pub fn extract_links(text: &str) -> Vec<ExtractedLink> {
    HANDLERS.extract_links(text)
}

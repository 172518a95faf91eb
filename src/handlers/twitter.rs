use regex::Regex;

use super::traits::{LinkKind, SiteHandler};
use crate::constants::CANONICAL_STATUS_BASE;
use crate::error::ArchiveError;
use crate::models::PostId;

static STATUS_PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![Regex::new(
        r"https?://(?:www\.|mobile\.)?(?:twitter\.com|x\.com)/[A-Za-z0-9_]+/status/\d+",
    )
    .unwrap()]
});

static MEDIA_PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![Regex::new(
        r"https?://(?:www\.|mobile\.)?(?:twitter\.com|x\.com)/[A-Za-z0-9_]+/media\b",
    )
    .unwrap()]
});

/// Pattern to extract the post id from any status URL, including `/i/status/{id}`.
static POST_ID_PATTERN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"/status/(\d+)").unwrap());

/// Post id embedded in a `{author}-{tweet_id}-{num:02d}.{ext}` filename.
static FILENAME_ID_PATTERN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"-(\d{10,20})-\d{2}\.\w+$").unwrap());

/// Single posts on X/Twitter.
pub struct TwitterStatusHandler;

impl TwitterStatusHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for TwitterStatusHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteHandler for TwitterStatusHandler {
    fn site_id(&self) -> &'static str {
        "x_status"
    }

    fn url_patterns(&self) -> &[Regex] {
        &STATUS_PATTERNS
    }

    fn link_kind(&self) -> LinkKind {
        LinkKind::Status
    }

    fn priority(&self) -> i32 {
        100
    }

    fn normalize_url(&self, url: &str) -> String {
        normalize_host(url)
    }
}

/// The media tab of an X/Twitter user (`/{user}/media`).
///
/// Outranks [`TwitterStatusHandler`] so media tab links are claimed first.
pub struct TwitterMediaHandler;

impl TwitterMediaHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for TwitterMediaHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteHandler for TwitterMediaHandler {
    fn site_id(&self) -> &'static str {
        "x_media"
    }

    fn url_patterns(&self) -> &[Regex] {
        &MEDIA_PATTERNS
    }

    fn link_kind(&self) -> LinkKind {
        LinkKind::UserMedia
    }

    fn priority(&self) -> i32 {
        200
    }

    fn normalize_url(&self, url: &str) -> String {
        normalize_host(url)
    }
}

/// Normalize all host variants to x.com.
fn normalize_host(url: &str) -> String {
    url.replace("://twitter.com/", "://x.com/")
        .replace("://www.twitter.com/", "://x.com/")
        .replace("://mobile.twitter.com/", "://x.com/")
        .replace("://www.x.com/", "://x.com/")
        .replace("://mobile.x.com/", "://x.com/")
}

/// Extract the post id from a status URL.
///
/// Works for both `/{user}/status/{id}` and the canonical `/i/status/{id}` form.
///
/// # Errors
///
/// Returns [`ArchiveError::MalformedUrl`] if the URL carries no status id.
pub fn extract_post_id(url: &str) -> Result<PostId, ArchiveError> {
    POST_ID_PATTERN
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| PostId::new(m.as_str()))
        .ok_or_else(|| ArchiveError::MalformedUrl(url.to_string()))
}

/// Recover the post id from a file saved with the X/Twitter filename template.
#[must_use]
pub fn post_id_from_filename(filename: &str) -> Option<PostId> {
    FILENAME_ID_PATTERN
        .captures(filename)
        .and_then(|caps| caps.get(1))
        .map(|m| PostId::new(m.as_str()))
}

/// Canonical "view by id" URL for a post, usable without knowing its author.
#[must_use]
pub fn status_url_for(id: &PostId) -> String {
    format!("{CANONICAL_STATUS_BASE}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_handle() {
        let handler = TwitterStatusHandler::new();

        assert!(handler.can_handle("https://twitter.com/user/status/123"));
        assert!(handler.can_handle("https://www.twitter.com/user/status/123"));
        assert!(handler.can_handle("https://x.com/user/status/123"));
        assert!(handler.can_handle("https://mobile.x.com/user/status/123"));
        assert!(handler.can_handle("https://x.com/i/status/123"));

        assert!(!handler.can_handle("https://x.com/user/media"));
        assert!(!handler.can_handle("https://example.com/"));
    }

    #[test]
    fn test_media_can_handle() {
        let handler = TwitterMediaHandler::new();
        assert!(handler.can_handle("https://x.com/user/media"));
        assert!(handler.can_handle("https://twitter.com/user_1/media"));
        assert!(!handler.can_handle("https://x.com/user/mediaxyz"));
        assert!(!handler.can_handle("https://x.com/user/status/1"));
    }

    #[test]
    fn test_normalize_url() {
        let handler = TwitterStatusHandler::new();
        assert_eq!(
            handler.normalize_url("https://mobile.twitter.com/user/status/123"),
            "https://x.com/user/status/123"
        );
        assert_eq!(
            handler.normalize_url("https://www.x.com/user/status/123"),
            "https://x.com/user/status/123"
        );
    }

    #[test]
    fn test_extract_post_id() {
        assert_eq!(
            extract_post_id("https://x.com/user/status/1234567890").unwrap(),
            PostId::from("1234567890")
        );
        assert_eq!(
            extract_post_id("https://twitter.com/user/status/123?s=20").unwrap(),
            PostId::from("123")
        );
        assert_eq!(
            extract_post_id("https://x.com/i/status/99").unwrap(),
            PostId::from("99")
        );
        assert!(matches!(
            extract_post_id("https://x.com/user/media"),
            Err(ArchiveError::MalformedUrl(_))
        ));
    }

    #[test]
    fn test_post_id_from_filename() {
        assert_eq!(
            post_id_from_filename("AIUnajyu-2022329732306772314-01.jpg"),
            Some(PostId::from("2022329732306772314"))
        );
        assert_eq!(
            post_id_from_filename("some-name-with-dashes-1234567890-12.mp4"),
            Some(PostId::from("1234567890"))
        );
        // Too short to be a post id
        assert_eq!(post_id_from_filename("user-12345-01.jpg"), None);
        assert_eq!(post_id_from_filename("illust_12345_p0.png"), None);
    }

    #[test]
    fn test_status_url_for() {
        assert_eq!(
            status_url_for(&PostId::from("99")),
            "https://x.com/i/status/99"
        );
    }
}

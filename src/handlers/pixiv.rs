use regex::Regex;

use super::traits::{LinkKind, SiteHandler};

static PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![Regex::new(r"https?://(?:www\.)?pixiv\.net/(?:en/)?artworks/\d+").unwrap()]
});

pub struct PixivHandler;

impl PixivHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for PixivHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteHandler for PixivHandler {
    fn site_id(&self) -> &'static str {
        "pixiv"
    }

    fn url_patterns(&self) -> &[Regex] {
        &PATTERNS
    }

    fn link_kind(&self) -> LinkKind {
        LinkKind::Direct
    }

    fn priority(&self) -> i32 {
        50
    }
}

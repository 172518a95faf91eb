use regex::Regex;

use super::traits::{LinkKind, SiteHandler};

static PATTERNS: std::sync::LazyLock<Vec<Regex>> = std::sync::LazyLock::new(|| {
    vec![Regex::new(r"https?://(?:i\.|www\.)?imgur\.com/[A-Za-z0-9/_\-.]+").unwrap()]
});

pub struct ImgurHandler;

impl ImgurHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for ImgurHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteHandler for ImgurHandler {
    fn site_id(&self) -> &'static str {
        "imgur"
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

    fn normalize_url(&self, url: &str) -> String {
        // Sentence punctuation is swallowed by the path character class
        url.replace("://www.imgur.com/", "://imgur.com/")
            .trim_end_matches('.')
            .to_string()
    }
}

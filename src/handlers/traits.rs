use regex::Regex;
use serde::Serialize;

/// How a link is turned into archived files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// A whole author media tab, crawled in bulk.
    UserMedia,
    /// A single post that may be part of a self-reply thread.
    Status,
    /// A standalone artwork-style link with no thread concept.
    Direct,
}

/// A supported link found in free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedLink {
    pub url: String,
    pub site: &'static str,
    pub kind: LinkKind,
}

/// Trait for site-specific link families.
pub trait SiteHandler: Send + Sync {
    /// Unique identifier for this handler.
    fn site_id(&self) -> &'static str;

    /// Unanchored patterns used to find links of this family inside free text.
    fn url_patterns(&self) -> &[Regex];

    /// What kind of fetch links of this family need.
    fn link_kind(&self) -> LinkKind;

    /// Check if this handler can handle the given URL.
    fn can_handle(&self, url: &str) -> bool {
        self.url_patterns()
            .iter()
            .any(|p| p.find(url).is_some_and(|m| m.start() == 0))
    }

    /// Normalize a URL for this site.
    fn normalize_url(&self, url: &str) -> String {
        url.to_string()
    }

    /// Priority for handler selection (higher = preferred).
    fn priority(&self) -> i32 {
        0
    }
}

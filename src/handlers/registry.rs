use std::cmp::Reverse;
use std::collections::HashSet;

use super::traits::{ExtractedLink, SiteHandler};

/// Registry of site handlers.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn SiteHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler.
    pub fn register(&mut self, handler: Box<dyn SiteHandler>) {
        self.handlers.push(handler);
        // Sort by priority (highest first); stable, so ties keep registration order
        self.handlers.sort_by_key(|h| Reverse(h.priority()));
    }

    /// Find the best handler for a URL.
    #[must_use]
    pub fn find_handler(&self, url: &str) -> Option<&dyn SiteHandler> {
        self.handlers
            .iter()
            .find(|h| h.can_handle(url))
            .map(AsRef::as_ref)
    }

    /// Classify a single bare URL.
    #[must_use]
    pub fn classify(&self, url: &str) -> Option<ExtractedLink> {
        let url = url.trim();
        self.find_handler(url).map(|h| ExtractedLink {
            url: h.normalize_url(url),
            site: h.site_id(),
            kind: h.link_kind(),
        })
    }

    /// Extract every supported link from free text.
    ///
    /// Higher-priority handlers claim their matches first; a lower-priority
    /// match overlapping an already claimed span is ignored. Links are
    /// returned grouped by handler priority and de-duplicated.
    #[must_use]
    pub fn extract_links(&self, text: &str) -> Vec<ExtractedLink> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for handler in &self.handlers {
            let mut matches: Vec<(usize, usize)> = handler
                .url_patterns()
                .iter()
                .flat_map(|p| p.find_iter(text).map(|m| (m.start(), m.end())))
                .collect();
            matches.sort_unstable();

            for (start, end) in matches {
                if claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                claimed.push((start, end));

                let url = handler.normalize_url(&text[start..end]);
                if seen.insert(url.clone()) {
                    links.push(ExtractedLink {
                        url,
                        site: handler.site_id(),
                        kind: handler.link_kind(),
                    });
                }
            }
        }

        links
    }

    /// Get all registered handlers.
    #[must_use]
    pub fn handlers(&self) -> &[Box<dyn SiteHandler>] {
        &self.handlers
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archiver::PostInfoSource;
use crate::constants::DEFAULT_MAX_THREAD_DEPTH;
use crate::error::ArchiveError;
use crate::handlers::twitter::{extract_post_id, status_url_for};
use crate::models::ThreadDescriptor;

/// Expands one post URL into the posts of the same authored thread.
///
/// The walk follows parent links upward. The author of the starting post is
/// the thread author; ancestors by anyone else are left out but walked
/// through, since the chain can pass another person's reply on its way to
/// older posts by the thread author. Posts with an unknown author are kept.
pub struct ThreadResolver {
    info: Arc<dyn PostInfoSource>,
    max_depth: usize,
}

impl ThreadResolver {
    pub fn new(info: Arc<dyn PostInfoSource>) -> Self {
        Self {
            info,
            max_depth: DEFAULT_MAX_THREAD_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolve the thread that `start_url` belongs to.
    ///
    /// `post_urls[0]` is `start_url`; ancestors follow in walk order using
    /// their canonical `/i/status/<id>` form. The walk stops at the depth
    /// limit, on a revisited post, or when a post has no parent.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::MalformedUrl`] if `start_url` carries no post
    /// id, and the lookup error if metadata for the starting post cannot be
    /// fetched. Lookup failures on ancestors only end the walk early.
    pub async fn resolve_thread(&self, start_url: &str) -> Result<ThreadDescriptor, ArchiveError> {
        let conversation_id = extract_post_id(start_url)?;

        let mut visited = HashSet::new();
        let mut post_urls = Vec::new();
        let mut author_filter: Option<String> = None;
        let mut current = start_url.to_string();
        let mut depth = 0;

        loop {
            if depth >= self.max_depth {
                warn!(
                    url = %start_url,
                    max_depth = self.max_depth,
                    collected = post_urls.len(),
                    "Thread walk hit the depth limit"
                );
                break;
            }

            let id = match extract_post_id(&current) {
                Ok(id) => id,
                Err(e) if depth == 0 => return Err(e),
                Err(_) => break,
            };
            if !visited.insert(id.clone()) {
                debug!(post_id = %id, "Reply chain loops back, stopping");
                break;
            }

            let info = match self.info.post_info(&current).await {
                Ok(info) => info,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!(url = %current, error = %e, "Ancestor lookup failed, keeping partial thread");
                    break;
                }
            };

            if depth == 0 {
                author_filter = info.author_name.clone();
                post_urls.push(current.clone());
            } else {
                match (&author_filter, &info.author_name) {
                    (Some(thread_author), Some(author)) if thread_author != author => {
                        debug!(post_id = %id, author = %author, "Skipping post by another author");
                    }
                    _ => post_urls.push(current.clone()),
                }
            }

            match info.parent_id {
                Some(parent) => {
                    current = status_url_for(&parent);
                    depth += 1;
                }
                None => break,
            }
        }

        info!(
            conversation_id = %conversation_id,
            posts = post_urls.len(),
            "Thread resolved"
        );
        Ok(ThreadDescriptor {
            conversation_id,
            post_urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::archiver::PostInfo;
    use crate::models::PostId;

    /// Metadata keyed by post id: (parent, author).
    #[derive(Default)]
    struct StubInfo {
        posts: HashMap<String, (Option<String>, Option<String>)>,
        failing: HashSet<String>,
        lookups: Mutex<usize>,
    }

    impl StubInfo {
        fn post(mut self, id: &str, parent: Option<&str>, author: Option<&str>) -> Self {
            self.posts.insert(
                id.to_string(),
                (parent.map(str::to_string), author.map(str::to_string)),
            );
            self
        }

        fn failing(mut self, id: &str) -> Self {
            self.failing.insert(id.to_string());
            self
        }
    }

    #[async_trait]
    impl PostInfoSource for StubInfo {
        async fn post_info(&self, url: &str) -> Result<PostInfo, ArchiveError> {
            *self.lookups.lock().unwrap() += 1;
            let id = extract_post_id(url)?;
            if self.failing.contains(id.as_str()) {
                return Err(ArchiveError::MetadataFetchTimeout {
                    url: url.to_string(),
                    timeout: Duration::from_secs(30),
                });
            }
            Ok(self
                .posts
                .get(id.as_str())
                .map(|(parent, author)| PostInfo {
                    parent_id: parent.as_deref().map(PostId::from),
                    author_name: author.clone(),
                })
                .unwrap_or_default())
        }
    }

    fn resolver(info: StubInfo) -> ThreadResolver {
        ThreadResolver::new(Arc::new(info))
    }

    #[tokio::test]
    async fn test_two_post_thread() {
        let info = StubInfo::default()
            .post("100", Some("99"), Some("userA"))
            .post("99", None, Some("userA"));

        let thread = resolver(info)
            .resolve_thread("https://x.com/userA/status/100")
            .await
            .unwrap();

        assert_eq!(thread.conversation_id, PostId::from("100"));
        assert_eq!(
            thread.post_urls,
            vec![
                "https://x.com/userA/status/100".to_string(),
                "https://x.com/i/status/99".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_long_chain_stops_at_depth_limit() {
        let mut info = StubInfo::default();
        for n in 1..=1000u32 {
            let parent = (n < 1000).then(|| (n + 1).to_string());
            info = info.post(&n.to_string(), parent.as_deref(), Some("a"));
        }
        let info = Arc::new(info);
        let resolver = ThreadResolver::new(info.clone());

        let thread = resolver
            .resolve_thread("https://x.com/a/status/1")
            .await
            .unwrap();

        assert_eq!(thread.post_urls.len(), 50);
        assert_eq!(*info.lookups.lock().unwrap(), 50);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let info = StubInfo::default()
            .post("1", Some("2"), Some("a"))
            .post("2", Some("1"), Some("a"));

        let thread = resolver(info)
            .resolve_thread("https://x.com/a/status/1")
            .await
            .unwrap();

        assert_eq!(
            thread.post_urls,
            vec![
                "https://x.com/a/status/1".to_string(),
                "https://x.com/i/status/2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_other_authors_are_walked_through() {
        let info = StubInfo::default()
            .post("4", Some("3"), Some("author"))
            .post("3", Some("2"), Some("author"))
            .post("2", Some("1"), Some("stranger"))
            .post("1", None, Some("author"));

        let thread = resolver(info)
            .resolve_thread("https://x.com/author/status/4")
            .await
            .unwrap();

        assert_eq!(
            thread.post_urls,
            vec![
                "https://x.com/author/status/4".to_string(),
                "https://x.com/i/status/3".to_string(),
                "https://x.com/i/status/1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_author_is_kept() {
        let info = StubInfo::default()
            .post("2", Some("1"), Some("author"))
            .post("1", None, None);

        let thread = resolver(info)
            .resolve_thread("https://x.com/author/status/2")
            .await
            .unwrap();

        assert_eq!(thread.post_urls.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_start_url() {
        let result = resolver(StubInfo::default())
            .resolve_thread("https://x.com/author")
            .await;
        assert!(matches!(result, Err(ArchiveError::MalformedUrl(_))));
    }

    #[tokio::test]
    async fn test_start_lookup_failure_is_fatal() {
        let info = StubInfo::default().failing("5");
        let result = resolver(info)
            .resolve_thread("https://x.com/a/status/5")
            .await;
        assert!(matches!(
            result,
            Err(ArchiveError::MetadataFetchTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_ancestor_lookup_failure_keeps_partial_thread() {
        let info = StubInfo::default()
            .post("5", Some("4"), Some("a"))
            .post("4", Some("3"), Some("a"))
            .failing("3");

        let thread = resolver(info)
            .resolve_thread("https://x.com/a/status/5")
            .await
            .unwrap();

        assert_eq!(
            thread.post_urls,
            vec![
                "https://x.com/a/status/5".to_string(),
                "https://x.com/i/status/4".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_depth_returns_empty_thread() {
        let thread = resolver(StubInfo::default())
            .with_max_depth(0)
            .resolve_thread("https://x.com/a/status/5")
            .await
            .unwrap();
        assert!(thread.post_urls.is_empty());
    }
}

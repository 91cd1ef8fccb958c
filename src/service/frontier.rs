//! Frontier queue and visited set. Owned by the crawl coordinator alone;
//! workers never touch it directly, which is what serializes all access.

use std::collections::{HashSet, VecDeque};

use url::Url;

/// Canonical form of a URL for "same page" decisions: fragment stripped,
/// host lowercased (done by the `url` crate on parse), default port dropped,
/// and an empty path canonicalized to `/`. This normalization is the single
/// source of truth for deduplication.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    if normalized.path().is_empty() {
        normalized.set_path("/");
    }
    // Url::parse already lowercases the host and omits default ports, but
    // links built by string surgery may sneak an explicit one through.
    if let Some(port) = normalized.port() {
        let default = match normalized.scheme() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        };
        if Some(port) == default {
            let _ = normalized.set_port(None);
        }
    }
    normalized
}

#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<Url>,
    seen: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a URL unless its normalized form was seen before. Returns
    /// whether the URL was accepted.
    pub fn push(&mut self, url: &Url) -> bool {
        let normalized = normalize_url(url);
        if self.seen.insert(normalized.to_string()) {
            self.queue.push_back(normalized);
            true
        } else {
            false
        }
    }

    pub fn pop(&mut self) -> Option<Url> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_normalize_strips_fragment_and_default_port() {
        assert_eq!(
            normalize_url(&url("https://Example.com:443/page#section")).as_str(),
            "https://example.com/page"
        );
        assert_eq!(
            normalize_url(&url("http://example.com:80/")).as_str(),
            "http://example.com/"
        );
        // Non-default port survives
        assert_eq!(
            normalize_url(&url("http://example.com:8080/x")).as_str(),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn test_push_dedups_by_normalized_form() {
        let mut frontier = Frontier::new();
        assert!(frontier.push(&url("https://example.com/page")));
        assert!(!frontier.push(&url("https://example.com/page#a")));
        assert!(!frontier.push(&url("https://EXAMPLE.com/page")));
        assert_eq!(frontier.len(), 1);

        assert!(frontier.push(&url("https://example.com/other")));
        assert_eq!(frontier.len(), 2);
    }

    #[test]
    fn test_pop_is_fifo() {
        let mut frontier = Frontier::new();
        frontier.push(&url("https://example.com/a"));
        frontier.push(&url("https://example.com/b"));
        assert_eq!(frontier.pop().unwrap().path(), "/a");
        assert_eq!(frontier.pop().unwrap().path(), "/b");
        assert!(frontier.pop().is_none());
    }

    #[test]
    fn test_seen_survives_pop() {
        let mut frontier = Frontier::new();
        frontier.push(&url("https://example.com/a"));
        frontier.pop();
        assert!(!frontier.push(&url("https://example.com/a")));
    }
}

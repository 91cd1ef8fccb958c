//! The immutable per-page context rules read from.

use std::sync::Arc;

use url::Url;

use crate::domain::models::CrawledPage;
use crate::extractor::PageData;
use crate::rules::CrossPageState;

/// Everything one rule run can observe: the fetched response metadata, the
/// parsed page data, and the shared cross-page state. The context itself is
/// immutable; only `state` carries interior mutability, serialized per key.
pub struct AuditContext {
    pub url: Url,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub size_bytes: usize,
    pub redirect_chain: Vec<String>,
    /// Set when the fetch itself failed; rules that need a body should warn
    /// rather than fail hard on such pages.
    pub fetch_failure: Option<String>,
    pub page: PageData,
    pub state: Arc<CrossPageState>,
}

impl AuditContext {
    /// Build a context from a crawled page, parsing its body once.
    pub fn from_page(page: &CrawledPage, state: Arc<CrossPageState>) -> anyhow::Result<Self> {
        let url = Url::parse(&page.url)?;
        let data = match &page.body {
            Some(body) => PageData::parse(body, &url),
            None => PageData::default(),
        };

        Ok(Self {
            url,
            final_url: page.final_url.clone(),
            status_code: page.status_code,
            response_time_ms: page.response_time_ms,
            size_bytes: page.size_bytes,
            redirect_chain: page.redirect_chain.clone(),
            fetch_failure: page.failure.clone(),
            page: data,
            state,
        })
    }

    pub fn fetched_ok(&self) -> bool {
        self.fetch_failure.is_none() && self.status_code.map(|s| s < 400).unwrap_or(false)
    }

    #[cfg(test)]
    pub fn for_html(url: &str, html: &str) -> Self {
        Self::for_html_with_state(url, html, Arc::new(CrossPageState::new()))
    }

    #[cfg(test)]
    pub fn for_html_with_state(url: &str, html: &str, state: Arc<CrossPageState>) -> Self {
        let url = Url::parse(url).expect("test url");
        let page = PageData::parse(html, &url);
        Self {
            final_url: url.to_string(),
            url,
            status_code: Some(200),
            response_time_ms: 100,
            size_bytes: html.len(),
            redirect_chain: vec![],
            fetch_failure: None,
            page,
            state,
        }
    }
}

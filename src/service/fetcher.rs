//! Single-page HTTP fetching: one GET (or HEAD) with timeout, capturing
//! status, body, response time and the redirect chain.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::Client;
use url::Url;

use crate::service::http::{create_client, DEFAULT_USER_AGENT};

const MAX_REDIRECTS: usize = 10;

/// Raw outcome of fetching one URL.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
    pub response_time_ms: u64,
    pub size_bytes: usize,
    /// Intermediate URLs visited before the final response, in order.
    pub redirect_chain: Vec<String>,
}

/// Seam between the crawler and the network. Tests substitute an in-memory
/// implementation to drive the crawl loop deterministically.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;

    /// Lightweight status probe used for link checking.
    async fn head(&self, url: &Url) -> Result<u16>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Result<Self> {
        let client = create_client(timeout, user_agent.unwrap_or(DEFAULT_USER_AGENT))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let started = Instant::now();
        let mut current = url.clone();
        let mut redirect_chain = Vec::new();

        loop {
            log::trace!("[FETCH] GET {current}");
            let response = self
                .client
                .get(current.as_str())
                .send()
                .await
                .with_context(|| format!("request to {current} failed"))?;

            let status = response.status();
            if status.is_redirection() {
                if redirect_chain.len() >= MAX_REDIRECTS {
                    return Err(anyhow!("too many redirects starting from {url}"));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| anyhow!("redirect from {current} without Location header"))?;
                let next = current
                    .join(location)
                    .with_context(|| format!("invalid redirect target: {location}"))?;
                redirect_chain.push(current.to_string());
                current = next;
                continue;
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            let body = response.text().await.context("failed to read response body")?;
            let elapsed = started.elapsed().as_millis() as u64;

            log::debug!(
                "[FETCH] {} -> {} ({} bytes in {}ms, {} redirect(s))",
                url,
                status.as_u16(),
                body.len(),
                elapsed,
                redirect_chain.len()
            );

            return Ok(FetchedPage {
                url: url.to_string(),
                final_url: current.to_string(),
                status: status.as_u16(),
                size_bytes: body.len(),
                body,
                content_type,
                response_time_ms: elapsed,
                redirect_chain,
            });
        }
    }

    async fn head(&self, url: &Url) -> Result<u16> {
        let response = self
            .client
            .head(url.as_str())
            .send()
            .await
            .with_context(|| format!("HEAD request to {url} failed"))?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5), None).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>hello</body></html>")
            .create_async()
            .await;

        let url = Url::parse(&server.url()).unwrap();
        let page = fetcher().fetch(&url).await.unwrap();

        assert_eq!(page.status, 200);
        assert!(page.body.contains("hello"));
        assert_eq!(page.content_type.as_deref(), Some("text/html"));
        assert!(page.redirect_chain.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_records_redirect_chain() {
        let mut server = mockito::Server::new_async().await;
        let _m1 = server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", "/new")
            .create_async()
            .await;
        let _m2 = server
            .mock("GET", "/new")
            .with_status(200)
            .with_body("<html>moved</html>")
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/old", server.url())).unwrap();
        let page = fetcher().fetch(&url).await.unwrap();

        assert_eq!(page.status, 200);
        assert_eq!(page.redirect_chain.len(), 1);
        assert!(page.redirect_chain[0].ends_with("/old"));
        assert!(page.final_url.ends_with("/new"));
    }

    #[tokio::test]
    async fn test_fetch_404_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/missing", server.url())).unwrap();
        let page = fetcher().fetch(&url).await.unwrap();
        assert_eq!(page.status, 404);
    }

    #[tokio::test]
    async fn test_redirect_loop_bails_out() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/loop")
            .with_status(302)
            .with_header("location", "/loop")
            .expect_at_least(1)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/loop", server.url())).unwrap();
        let err = fetcher().fetch(&url).await.unwrap_err();
        assert!(err.to_string().contains("too many redirects"));
    }

    #[tokio::test]
    async fn test_head_returns_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("HEAD", "/probe")
            .with_status(204)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/probe", server.url())).unwrap();
        assert_eq!(fetcher().head(&url).await.unwrap(), 204);
    }
}

//! Bounded-concurrency crawl loop with resumable, cache-aware discovery.
//!
//! One coordinator owns the frontier and the visited set; fetches run as
//! parallel tasks capped at the configured concurrency. Completed pages are
//! persisted, fed to the sink (normally the audit engine) and mined for new
//! same-origin links. Per-page failures are recorded, never crawl-fatal;
//! only an unreachable seed aborts the crawl.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::time::sleep;
use url::Url;

use crate::domain::models::{CrawlStats, CrawlSummary, CrawledPage};
use crate::error::{AuditError, Result};
use crate::extractor::{sitemap, PageData};
use crate::repository::sqlite::{CrawlRepository, LinkCacheRepository};
use crate::service::fetcher::{FetchedPage, PageFetcher};
use crate::service::frontier::{normalize_url, Frontier};
use crate::service::robots::RobotsPolicy;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 20;
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub max_pages: usize,
    pub concurrency: usize,
    pub request_timeout: Duration,
    /// Follow links to other origins when false.
    pub same_origin_only: bool,
    /// Reuse fresh link-cache entries instead of refetching.
    pub resume: bool,
    /// Force a full refetch regardless of cache state.
    pub refresh: bool,
    pub respect_robots: bool,
    /// Pre-seed the frontier from sitemap.xml.
    pub use_sitemap: bool,
    pub user_agent: String,
    /// Minimum delay between request starts. robots.txt crawl-delay wins
    /// when larger.
    pub crawl_delay: Option<Duration>,
    pub cache_ttl: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: 25,
            concurrency: num_cpus::get().clamp(MIN_CONCURRENCY, 4),
            request_timeout: Duration::from_secs(30),
            same_origin_only: true,
            resume: false,
            refresh: false,
            respect_robots: true,
            use_sitemap: true,
            user_agent: crate::service::http::DEFAULT_USER_AGENT.to_string(),
            crawl_delay: None,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl CrawlOptions {
    /// Reject bad configuration before any network activity starts.
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(AuditError::config("max_pages must be at least 1"));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(AuditError::config(format!(
                "concurrency must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}, got {}",
                self.concurrency
            )));
        }
        if self.request_timeout < MIN_TIMEOUT || self.request_timeout > MAX_TIMEOUT {
            return Err(AuditError::config(format!(
                "request timeout must be between {}s and {}s",
                MIN_TIMEOUT.as_secs(),
                MAX_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }
}

/// Receives each page as soon as the crawler has persisted it. The audit
/// runner plugs the engine in here; `crawl_only` uses the no-op.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn on_page(&self, page: &CrawledPage, data: Option<&PageData>) -> anyhow::Result<()>;
}

pub struct NoopSink;

#[async_trait]
impl PageSink for NoopSink {
    async fn on_page(&self, _page: &CrawledPage, _data: Option<&PageData>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    repo: CrawlRepository,
    cache: LinkCacheRepository,
    options: CrawlOptions,
    cancel: Arc<AtomicBool>,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>, crawl_pool: SqlitePool, options: CrawlOptions) -> Self {
        Self {
            fetcher,
            repo: CrawlRepository::new(crawl_pool.clone()),
            cache: LinkCacheRepository::new(crawl_pool),
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between pages; in-flight fetches finish before the crawl
    /// returns so crawl-state never holds half-fetched records.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn crawl(&self, seed: &Url, sink: &dyn PageSink) -> Result<CrawlSummary> {
        self.options.validate()?;

        let seed = normalize_url(seed);
        let domain = seed
            .host_str()
            .ok_or_else(|| AuditError::InvalidUrl(format!("{seed} has no host")))?
            .to_string();

        let crawl_id = uuid::Uuid::new_v4().to_string();
        self.repo.create(&crawl_id, &domain, seed.as_str()).await?;

        log::info!(
            "[CRAWL] {} starting from {} (max_pages={}, concurrency={})",
            crawl_id,
            seed,
            self.options.max_pages,
            self.options.concurrency
        );

        match self.run_crawl(&crawl_id, &domain, &seed, sink).await {
            Ok(summary) => {
                self.repo.complete(&crawl_id, &summary.stats).await?;
                log::info!(
                    "[CRAWL] {} complete: {} fetched, {} cached, {} failed",
                    crawl_id,
                    summary.stats.pages_fetched,
                    summary.stats.pages_from_cache,
                    summary.stats.pages_failed
                );
                Ok(summary)
            }
            Err(e) => {
                self.repo.fail(&crawl_id).await.ok();
                Err(e)
            }
        }
    }

    async fn run_crawl(
        &self,
        crawl_id: &str,
        domain: &str,
        seed: &Url,
        sink: &dyn PageSink,
    ) -> Result<CrawlSummary> {
        // robots.txt is fetched exactly once, before the frontier drains
        let robots = if self.options.respect_robots {
            RobotsPolicy::load(self.fetcher.as_ref(), seed, &self.options.user_agent).await
        } else {
            RobotsPolicy::allow_all()
        };
        let delay = match (self.options.crawl_delay, robots.crawl_delay()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let mut frontier = Frontier::new();
        frontier.push(seed);

        if self.options.use_sitemap {
            self.preseed_from_sitemap(seed, &mut frontier).await;
        }

        let mut stats = CrawlStats::default();
        let mut pages: Vec<CrawledPage> = Vec::new();
        let mut seen_hashes: HashMap<String, String> = HashMap::new();
        let mut in_flight: FuturesUnordered<
            tokio::task::JoinHandle<(Url, anyhow::Result<FetchedPage>)>,
        > = FuturesUnordered::new();
        let mut processed = 0usize;

        loop {
            // Schedule up to the concurrency bound; processed + in-flight
            // never exceeds max_pages, so draining cannot overshoot it.
            while processed + in_flight.len() < self.options.max_pages
                && in_flight.len() < self.options.concurrency
                && !self.cancel.load(Ordering::Relaxed)
            {
                let Some(url) = frontier.pop() else { break };

                if self.options.same_origin_only && !same_origin(&url, seed) {
                    stats.urls_skipped_offsite += 1;
                    continue;
                }
                if !robots.allowed(&url) {
                    log::debug!("[CRAWL] robots.txt disallows {url}");
                    stats.urls_skipped_robots += 1;
                    continue;
                }

                if self.options.resume && !self.options.refresh {
                    if let Some(page) = self.replay_from_cache(&url).await? {
                        log::debug!("[CRAWL] Reusing cached copy of {url}");
                        self.finish_page(crawl_id, seed, page, sink, &mut frontier, &mut stats, &mut seen_hashes, &mut pages)
                            .await?;
                        processed += 1;
                        continue;
                    }
                }

                if let Some(delay) = delay {
                    sleep(delay).await;
                }

                let fetcher = self.fetcher.clone();
                in_flight.push(tokio::spawn(async move {
                    let result = fetcher.fetch(&url).await;
                    (url, result)
                }));
            }

            if in_flight.is_empty() {
                break;
            }

            let (url, result) = in_flight
                .next()
                .await
                .expect("in_flight checked non-empty")
                .map_err(|e| AuditError::Other(anyhow!("fetch task panicked: {e}")))?;
            processed += 1;

            match result {
                Ok(fetched) => {
                    let page = page_from_fetch(&url, fetched);
                    self.finish_page(crawl_id, seed, page, sink, &mut frontier, &mut stats, &mut seen_hashes, &mut pages)
                        .await?;
                }
                Err(e) => {
                    if url == *seed {
                        return Err(AuditError::SeedUnreachable {
                            url: seed.to_string(),
                            reason: format!("{e:#}"),
                        });
                    }
                    log::warn!("[CRAWL] Failed to fetch {url}: {e:#}");
                    let page = failed_page(&url, &e);
                    self.finish_page(crawl_id, seed, page, sink, &mut frontier, &mut stats, &mut seen_hashes, &mut pages)
                        .await?;
                }
            }
        }

        Ok(CrawlSummary {
            crawl_id: crawl_id.to_string(),
            domain: domain.to_string(),
            start_url: seed.to_string(),
            pages,
            stats,
        })
    }

    async fn preseed_from_sitemap(&self, seed: &Url, frontier: &mut Frontier) {
        let Ok(sitemap_url) = seed.join(sitemap::SITEMAP_PATH) else {
            return;
        };
        match self.fetcher.fetch(&sitemap_url).await {
            Ok(page) if page.status == 200 => {
                let urls = sitemap::parse_sitemap(&page.body);
                let mut added = 0;
                for url in urls {
                    if same_origin(&url, seed) && frontier.push(&url) {
                        added += 1;
                    }
                }
                log::debug!("[CRAWL] Pre-seeded {added} URLs from sitemap");
            }
            Ok(page) => log::debug!("[CRAWL] No sitemap ({})", page.status),
            Err(e) => log::debug!("[CRAWL] Sitemap fetch failed: {e:#}"),
        }
    }

    /// Pure cache lookup for resume: a fresh, ok cache entry backed by a
    /// stored page body replays that page without a network fetch.
    async fn replay_from_cache(&self, url: &Url) -> Result<Option<CrawledPage>> {
        let Some(entry) = self
            .cache
            .get_fresh(url.as_str(), self.options.cache_ttl)
            .await?
        else {
            return Ok(None);
        };
        if !entry.ok {
            return Ok(None);
        }
        let Some(stored) = self.repo.latest_page_for_url(url.as_str()).await? else {
            return Ok(None);
        };

        Ok(Some(CrawledPage {
            url: url.to_string(),
            final_url: stored.final_url.unwrap_or_else(|| url.to_string()),
            status_code: stored.status_code.map(|s| s as u16),
            body: stored.body,
            content_hash: stored.content_hash,
            response_time_ms: stored.response_time_ms as u64,
            size_bytes: stored.size_bytes as usize,
            redirect_chain: vec![],
            from_cache: true,
            failure: None,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_page(
        &self,
        crawl_id: &str,
        seed: &Url,
        page: CrawledPage,
        sink: &dyn PageSink,
        frontier: &mut Frontier,
        stats: &mut CrawlStats,
        seen_hashes: &mut HashMap<String, String>,
        pages: &mut Vec<CrawledPage>,
    ) -> Result<()> {
        let data = match (&page.body, Url::parse(&page.url)) {
            (Some(body), Ok(base)) => Some(PageData::parse(body, &base)),
            _ => None,
        };

        if let Some(hash) = &page.content_hash {
            if let Some(first) = seen_hashes.get(hash) {
                if first != &page.url {
                    log::debug!("[CRAWL] {} duplicates content of {}", page.url, first);
                    stats.duplicate_pages += 1;
                }
            } else {
                seen_hashes.insert(hash.clone(), page.url.clone());
            }
        }

        self.repo.record_page(crawl_id, &page, data.as_ref()).await?;
        self.cache
            .upsert(
                &page.url,
                page.status_code,
                page.is_success(),
                page.content_hash.as_deref(),
            )
            .await?;

        if page.failure.is_some() {
            stats.pages_failed += 1;
        } else if page.from_cache {
            stats.pages_from_cache += 1;
        } else {
            stats.pages_fetched += 1;
        }

        // Mine the page for new same-origin URLs. The frontier dedups on
        // normalized form, so re-discovered pages are free.
        if let Some(data) = &data {
            for link in data.links.iter().filter(|l| l.is_internal) {
                if let Ok(url) = Url::parse(&link.href) {
                    if !self.options.same_origin_only || same_origin(&url, seed) {
                        frontier.push(&url);
                    }
                }
            }
        }

        sink.on_page(&page, data.as_ref()).await?;
        pages.push(page);
        Ok(())
    }
}

fn same_origin(url: &Url, seed: &Url) -> bool {
    url.host_str() == seed.host_str() && url.port() == seed.port() && url.scheme() == seed.scheme()
}

fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

fn page_from_fetch(url: &Url, fetched: FetchedPage) -> CrawledPage {
    let hash = content_hash(&fetched.body);
    let failure = if fetched.status >= 400 {
        Some(format!("HTTP {}", fetched.status))
    } else {
        None
    };
    CrawledPage {
        url: url.to_string(),
        final_url: fetched.final_url,
        status_code: Some(fetched.status),
        content_hash: Some(hash),
        size_bytes: fetched.size_bytes,
        response_time_ms: fetched.response_time_ms,
        redirect_chain: fetched.redirect_chain,
        body: Some(fetched.body),
        from_cache: false,
        failure,
    }
}

fn failed_page(url: &Url, error: &anyhow::Error) -> CrawledPage {
    CrawledPage {
        url: url.to_string(),
        final_url: url.to_string(),
        status_code: None,
        body: None,
        content_hash: None,
        response_time_ms: 0,
        size_bytes: 0,
        redirect_chain: vec![],
        from_cache: false,
        failure: Some(format!("{error:#}")),
    }
}

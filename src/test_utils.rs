//! Shared test fixtures: in-memory databases with migrations applied, HTML
//! builders, and a deterministic in-memory fetcher for crawl tests.

pub mod fixtures {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use url::Url;

    use crate::service::fetcher::{FetchedPage, PageFetcher};

    /// In-memory SQLite pool with the audits schema applied. A single
    /// connection, because every :memory: connection is its own database.
    pub async fn setup_audits_db() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("Failed to enable foreign keys");
        sqlx::migrate!("migrations/audits")
            .run(&pool)
            .await
            .expect("Failed to run audits migrations");
        pool
    }

    /// In-memory SQLite pool with the per-project crawl schema applied.
    pub async fn setup_crawl_db() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .expect("Failed to enable foreign keys");
        sqlx::migrate!("migrations/crawl")
            .run(&pool)
            .await
            .expect("Failed to run crawl migrations");
        pool
    }

    /// A standard HTML page for tests.
    pub fn basic_html_page(title: &str, h1: &str) -> String {
        format!(
            r#"<html>
                <head>
                    <title>{title}</title>
                    <meta name="description" content="A sufficiently long meta description for the {title} page of this site.">
                    <meta name="viewport" content="width=device-width, initial-scale=1">
                </head>
                <body><h1>{h1}</h1><p>{}</p></body>
            </html>"#,
            "content word ".repeat(200)
        )
    }

    /// In-memory fetcher keyed by URL path. Tracks per-URL fetch counts and
    /// the maximum number of simultaneous in-flight fetches.
    pub struct MockFetcher {
        origin: String,
        pages: HashMap<String, (u16, String)>,
        failing: HashSet<String>,
        latency: Option<Duration>,
        counts: Arc<Mutex<HashMap<String, usize>>>,
        current: Arc<AtomicUsize>,
        max: Arc<AtomicUsize>,
    }

    impl MockFetcher {
        pub fn new(origin: &str) -> Self {
            Self {
                origin: origin.trim_end_matches('/').to_string(),
                pages: HashMap::new(),
                failing: HashSet::new(),
                latency: None,
                counts: Arc::new(Mutex::new(HashMap::new())),
                current: Arc::new(AtomicUsize::new(0)),
                max: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn page(mut self, path: &str, body: &str) -> Self {
            self.pages.insert(path.to_string(), (200, body.to_string()));
            self
        }

        pub fn page_with_status(mut self, path: &str, status: u16, body: &str) -> Self {
            self.pages.insert(path.to_string(), (status, body.to_string()));
            self
        }

        /// Simulate a network-level failure for this path.
        pub fn failing(mut self, path: &str) -> Self {
            self.failing.insert(path.to_string());
            self
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        pub fn fetch_counts(&self) -> Arc<Mutex<HashMap<String, usize>>> {
            self.counts.clone()
        }

        pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
            self.max.clone()
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
            let path = url.path().to_string();

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&path) {
                return Err(anyhow!("connection refused: {url}"));
            }

            let Some((status, body)) = self.pages.get(&path) else {
                return Err(anyhow!("no mock registered for {url}"));
            };

            *self.counts.lock().unwrap().entry(path).or_insert(0) += 1;

            Ok(FetchedPage {
                url: url.to_string(),
                final_url: format!("{}{}", self.origin, url.path()),
                status: *status,
                body: body.clone(),
                content_type: Some("text/html".to_string()),
                response_time_ms: self.latency.map(|d| d.as_millis() as u64).unwrap_or(5),
                size_bytes: body.len(),
                redirect_chain: vec![],
            })
        }

        async fn head(&self, url: &Url) -> Result<u16> {
            let path = url.path();
            if self.failing.contains(path) {
                return Err(anyhow!("connection refused: {url}"));
            }
            Ok(self.pages.get(path).map(|(status, _)| *status).unwrap_or(404))
        }
    }
}

//! Per-project crawl storage: crawl sessions, fetched pages (bodies kept so
//! stored crawls can be re-analyzed without refetching), extracted links and
//! images. One page's rows are written in a single transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{CrawlStats, CrawledPage};
use crate::extractor::PageData;

use super::parse_datetime;

pub struct CrawlRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct StoredCrawl {
    pub crawl_id: String,
    pub domain: String,
    pub start_url: String,
    pub status: String,
    pub pages_fetched: i64,
    pub pages_from_cache: i64,
    pub pages_failed: i64,
    pub started_at: chrono::DateTime<Utc>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredPage {
    pub id: i64,
    pub url: String,
    pub final_url: Option<String>,
    pub status_code: Option<i64>,
    pub content_hash: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub response_time_ms: i64,
    pub size_bytes: i64,
    pub from_cache: bool,
    pub failure: Option<String>,
    pub fetched_at: chrono::DateTime<Utc>,
}

impl CrawlRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, crawl_id: &str, domain: &str, start_url: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO crawls (crawl_id, domain, start_url, status, started_at)
            VALUES (?, ?, ?, 'running', ?)
            "#,
        )
        .bind(crawl_id)
        .bind(domain)
        .bind(start_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to create crawl")?;

        log::info!("[STORE] Created crawl {crawl_id} for {start_url}");
        Ok(())
    }

    /// Persist one crawled page with its extracted links and images in a
    /// single transaction. Returns the page's row id.
    pub async fn record_page(
        &self,
        crawl_id: &str,
        page: &CrawledPage,
        data: Option<&PageData>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO pages (
                crawl_id, url, final_url, status_code, content_hash, title,
                body, response_time_ms, size_bytes, from_cache, failure, fetched_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(crawl_id)
        .bind(&page.url)
        .bind(&page.final_url)
        .bind(page.status_code.map(|s| s as i64))
        .bind(&page.content_hash)
        .bind(data.and_then(|d| d.title.clone()))
        .bind(&page.body)
        .bind(page.response_time_ms as i64)
        .bind(page.size_bytes as i64)
        .bind(page.from_cache)
        .bind(&page.failure)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to insert page")?;

        let page_id = result.last_insert_rowid();

        if let Some(data) = data {
            if !data.links.is_empty() {
                let mut qb = sqlx::QueryBuilder::new(
                    "INSERT INTO links (page_id, href, anchor_text, nofollow, is_internal) ",
                );
                qb.push_values(&data.links, |mut b, link| {
                    b.push_bind(page_id)
                        .push_bind(&link.href)
                        .push_bind(&link.text)
                        .push_bind(link.nofollow)
                        .push_bind(link.is_internal);
                });
                qb.build()
                    .execute(&mut *tx)
                    .await
                    .context("Failed to insert links")?;
            }

            if !data.images.is_empty() {
                let mut qb = sqlx::QueryBuilder::new("INSERT INTO images (page_id, src, alt) ");
                qb.push_values(&data.images, |mut b, image| {
                    b.push_bind(page_id).push_bind(&image.src).push_bind(&image.alt);
                });
                qb.build()
                    .execute(&mut *tx)
                    .await
                    .context("Failed to insert images")?;
            }
        }

        tx.commit().await?;
        Ok(page_id)
    }

    pub async fn complete(&self, crawl_id: &str, stats: &CrawlStats) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawls
            SET status = 'completed', pages_fetched = ?, pages_from_cache = ?,
                pages_failed = ?, completed_at = ?
            WHERE crawl_id = ?
            "#,
        )
        .bind(stats.pages_fetched as i64)
        .bind(stats.pages_from_cache as i64)
        .bind(stats.pages_failed as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(crawl_id)
        .execute(&self.pool)
        .await
        .context("Failed to complete crawl")?;
        Ok(())
    }

    pub async fn fail(&self, crawl_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE crawls SET status = 'failed', completed_at = ? WHERE crawl_id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(crawl_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark crawl failed")?;
        Ok(())
    }

    pub async fn get(&self, crawl_id: &str) -> Result<Option<StoredCrawl>> {
        let row = sqlx::query("SELECT * FROM crawls WHERE crawl_id = ?")
            .bind(crawl_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch crawl")?;

        Ok(row.map(|r| StoredCrawl {
            crawl_id: r.get("crawl_id"),
            domain: r.get("domain"),
            start_url: r.get("start_url"),
            status: r.get("status"),
            pages_fetched: r.get("pages_fetched"),
            pages_from_cache: r.get("pages_from_cache"),
            pages_failed: r.get("pages_failed"),
            started_at: parse_datetime(r.get::<String, _>("started_at").as_str()),
            completed_at: r
                .get::<Option<String>, _>("completed_at")
                .as_deref()
                .map(parse_datetime),
        }))
    }

    /// Most recent stored copy of a URL across all crawls of this project.
    /// Resume uses this to replay a cached page instead of refetching.
    pub async fn latest_page_for_url(&self, url: &str) -> Result<Option<StoredPage>> {
        let row = sqlx::query(
            "SELECT * FROM pages WHERE url = ? AND failure IS NULL ORDER BY fetched_at DESC, id DESC LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch stored page")?;

        Ok(row.as_ref().map(row_to_page))
    }

    pub async fn pages_for_crawl(&self, crawl_id: &str) -> Result<Vec<StoredPage>> {
        let rows = sqlx::query("SELECT * FROM pages WHERE crawl_id = ? ORDER BY id")
            .bind(crawl_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch crawl pages")?;

        Ok(rows.iter().map(row_to_page).collect())
    }
}

fn row_to_page(row: &sqlx::sqlite::SqliteRow) -> StoredPage {
    StoredPage {
        id: row.get("id"),
        url: row.get("url"),
        final_url: row.get("final_url"),
        status_code: row.get("status_code"),
        content_hash: row.get("content_hash"),
        title: row.get("title"),
        body: row.get("body"),
        response_time_ms: row.get("response_time_ms"),
        size_bytes: row.get("size_bytes"),
        from_cache: row.get("from_cache"),
        failure: row.get("failure"),
        fetched_at: parse_datetime(row.get::<String, _>("fetched_at").as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;
    use url::Url;

    fn page(url: &str, body: &str) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            final_url: url.to_string(),
            status_code: Some(200),
            body: Some(body.to_string()),
            content_hash: Some("abc".into()),
            response_time_ms: 42,
            size_bytes: body.len(),
            redirect_chain: vec![],
            from_cache: false,
            failure: None,
        }
    }

    #[tokio::test]
    async fn test_record_page_with_links_and_images() {
        let pool = fixtures::setup_crawl_db().await;
        let repo = CrawlRepository::new(pool.clone());
        repo.create("c1", "example.com", "https://example.com/").await.unwrap();

        let html = r#"<html><head><title>T</title></head>
            <body><a href="/next">Next</a><img src="i.jpg" alt="x"></body></html>"#;
        let base = Url::parse("https://example.com/").unwrap();
        let data = PageData::parse(html, &base);

        let page_id = repo
            .record_page("c1", &page("https://example.com/", html), Some(&data))
            .await
            .unwrap();

        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links WHERE page_id = ?")
            .bind(page_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(links, 1);

        let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE page_id = ?")
            .bind(page_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(images, 1);

        let stored = repo
            .latest_page_for_url("https://example.com/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title.as_deref(), Some("T"));
        assert!(stored.body.unwrap().contains("Next"));
    }

    #[tokio::test]
    async fn test_latest_page_skips_failures() {
        let pool = fixtures::setup_crawl_db().await;
        let repo = CrawlRepository::new(pool);
        repo.create("c1", "example.com", "https://example.com/").await.unwrap();

        let mut failed = page("https://example.com/x", "");
        failed.failure = Some("timeout".into());
        failed.body = None;
        repo.record_page("c1", &failed, None).await.unwrap();

        assert!(repo
            .latest_page_for_url("https://example.com/x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_crawl_lifecycle_and_cascade() {
        let pool = fixtures::setup_crawl_db().await;
        let repo = CrawlRepository::new(pool.clone());
        repo.create("c1", "example.com", "https://example.com/").await.unwrap();
        repo.record_page("c1", &page("https://example.com/", "<html></html>"), None)
            .await
            .unwrap();

        let stats = CrawlStats {
            pages_fetched: 1,
            ..Default::default()
        };
        repo.complete("c1", &stats).await.unwrap();

        let crawl = repo.get("c1").await.unwrap().unwrap();
        assert_eq!(crawl.status, "completed");
        assert_eq!(crawl.pages_fetched, 1);

        sqlx::query("DELETE FROM crawls WHERE crawl_id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();
        let pages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(pages, 0, "pages cascade-delete with their crawl");
    }
}

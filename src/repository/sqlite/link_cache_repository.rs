//! Link-status cache: URL -> last-checked outcome. Used to skip refetching
//! unchanged pages on resume and to avoid re-probing links. Resume reads are
//! pure lookups; writes happen only when a page completes.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::parse_datetime;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub status_code: Option<i64>,
    pub ok: bool,
    pub content_hash: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.checked_at);
        if age < chrono::Duration::zero() {
            return false;
        }
        (age.num_milliseconds() as u128) < ttl.as_millis()
    }
}

pub struct LinkCacheRepository {
    pool: SqlitePool,
}

impl LinkCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(
        &self,
        url: &str,
        status_code: Option<u16>,
        ok: bool,
        content_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO link_cache (url, status_code, ok, content_hash, checked_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                status_code = excluded.status_code,
                ok = excluded.ok,
                content_hash = excluded.content_hash,
                checked_at = excluded.checked_at
            "#,
        )
        .bind(url)
        .bind(status_code.map(|s| s as i64))
        .bind(ok)
        .bind(content_hash)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to upsert link cache entry")?;
        Ok(())
    }

    pub async fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM link_cache WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch link cache entry")?;

        Ok(row.map(|r| CacheEntry {
            url: r.get("url"),
            status_code: r.get("status_code"),
            ok: r.get("ok"),
            content_hash: r.get("content_hash"),
            checked_at: parse_datetime(r.get::<String, _>("checked_at").as_str()),
        }))
    }

    /// Entry for `url` if present and younger than `ttl`.
    pub async fn get_fresh(&self, url: &str, ttl: Duration) -> Result<Option<CacheEntry>> {
        Ok(self
            .get(url)
            .await?
            .filter(|entry| entry.is_fresh(ttl, Utc::now())))
    }

    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM link_cache")
            .execute(&self.pool)
            .await
            .context("Failed to clear link cache")?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM link_cache")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count link cache entries")
    }
}

//! SQLite pool construction for the two database identities: the global
//! audits database and the per-project crawl/link-cache database.
//!
//! Each database file is opened once per process and the pool is passed by
//! handle to the repositories; there is no global singleton.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Explicit database handles passed to the crawler and storage layer at
/// process start.
#[derive(Clone)]
pub struct Databases {
    pub audits: SqlitePool,
    pub crawl: SqlitePool,
}

impl Databases {
    pub fn new(audits: SqlitePool, crawl: SqlitePool) -> Self {
        Self { audits, crawl }
    }

    pub async fn close(&self) {
        self.audits.close().await;
        self.crawl.close().await;
    }
}

/// Configure SQLite pragmas per connection via the after_connect callback.
async fn configure_sqlite_pragmas(conn: &mut sqlx::SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Executor;

    // WAL mode: concurrent reads during writes
    conn.execute("PRAGMA journal_mode = WAL").await?;
    conn.execute("PRAGMA synchronous = NORMAL").await?;
    // Negative value = KB, so -65536 = 64MB cache
    conn.execute("PRAGMA cache_size = -65536").await?;
    // 5 second timeout for busy connections
    conn.execute("PRAGMA busy_timeout = 5000").await?;
    conn.execute("PRAGMA temp_store = MEMORY").await?;
    conn.execute("PRAGMA foreign_keys = ON").await?;

    Ok(())
}

async fn open_pool(db_url: &str, max_connections: u32) -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                configure_sqlite_pragmas(conn).await?;
                Ok(())
            })
        })
        .connect(db_url)
        .await
        .with_context(|| format!("failed to connect to database at {db_url}"))
}

/// Open (creating if needed) the global audits database under `data_dir` and
/// run its migrations.
pub async fn open_audits_db(data_dir: &Path) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir: {}", data_dir.display()))?;

    let db_path = data_dir.join("audits.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    log::info!("[DB] Audits database: {}", db_path.display());

    let pool = open_pool(&db_url, 10).await?;

    sqlx::migrate!("migrations/audits")
        .run(&pool)
        .await
        .context("failed to run audits migrations")?;

    Ok(pool)
}

/// Open (creating if needed) the crawl database for one project (domain) and
/// run its migrations. Each project gets its own database file so crawl data
/// never contends across sites.
pub async fn open_project_db(data_dir: &Path, project: &str) -> Result<SqlitePool> {
    let project_dir = data_dir.join("projects").join(sanitize_project_name(project));
    std::fs::create_dir_all(&project_dir)
        .with_context(|| format!("failed to create project dir: {}", project_dir.display()))?;

    let db_path = project_dir.join("crawl.db");
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    log::info!("[DB] Project crawl database: {}", db_path.display());

    let pool = open_pool(&db_url, 10).await?;

    sqlx::migrate!("migrations/crawl")
        .run(&pool)
        .await
        .context("failed to run crawl migrations")?;

    Ok(pool)
}

/// Project names come from domains; keep the directory name filesystem-safe.
fn sanitize_project_name(project: &str) -> String {
    project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Basic row counts for `db stats` style diagnostics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DbStats {
    pub crawls: i64,
    pub pages: i64,
    pub links: i64,
    pub images: i64,
    pub cached_urls: i64,
}

pub async fn crawl_db_stats(pool: &SqlitePool) -> Result<DbStats> {
    async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))
    }

    Ok(DbStats {
        crawls: count(pool, "crawls").await?,
        pages: count(pool, "pages").await?,
        links: count(pool, "links").await?,
        images: count(pool, "images").await?,
        cached_urls: count(pool, "link_cache").await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_project_name() {
        assert_eq!(sanitize_project_name("example.com"), "example.com");
        assert_eq!(sanitize_project_name("sub.example.com:8080"), "sub.example.com_8080");
        assert_eq!(sanitize_project_name("weird/../name"), "weird_.._name");
    }

    #[tokio::test]
    async fn test_open_databases_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let audits = open_audits_db(dir.path()).await.unwrap();
        let crawl = open_project_db(dir.path(), "example.com").await.unwrap();

        // Both schemas exist and are queryable
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audits")
            .fetch_one(&audits)
            .await
            .unwrap();
        assert_eq!(n, 0);

        let stats = crawl_db_stats(&crawl).await.unwrap();
        assert_eq!(stats.pages, 0);
    }
}

//! Process lifecycle helpers: logging setup and database handles.

use std::path::Path;

use anyhow::Result;

use crate::db::{self, Databases};

/// Initialize logging with tracing_subscriber.
///
/// The tracing-log bridge picks up `log` macro records from the rest of the
/// crate. Safe to call once per process; tests use their own subscriber.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sqlx=warn".parse().expect("valid directive"))
                .add_directive("siteaudit=debug".parse().expect("valid directive"))
                .add_directive("info".parse().expect("valid directive")),
        )
        .compact()
        .with_target(false)
        .init();
}

/// Open the global audits database plus the per-project crawl database under
/// `data_dir`, running migrations on both. The returned handle owns both
/// pools; lifecycle (open -> use -> close) is caller-managed.
pub async fn open_databases(data_dir: &Path, project: &str) -> Result<Databases> {
    let audits = db::open_audits_db(data_dir).await?;
    let crawl = db::open_project_db(data_dir, project).await?;
    Ok(Databases::new(audits, crawl))
}

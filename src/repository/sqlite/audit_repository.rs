//! Audit rows: created once at audit start, mutated exactly once at
//! completion or failure. Child tables (categories, results, issues,
//! comparisons) reference the internal integer id and cascade-delete.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::{map_audit_status, parse_datetime};
use crate::domain::models::{
    new_audit_id, Audit, CategoryDelta, Comparison, NewAudit,
};

pub struct AuditRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilters {
    pub domain: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new audit with status `running` and score 0.
    pub async fn create(&self, input: &NewAudit) -> Result<Audit> {
        let audit_id = new_audit_id();
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO audits (audit_id, domain, start_url, project_name, crawl_id, status, started_at)
            VALUES (?, ?, ?, ?, ?, 'running', ?)
            "#,
        )
        .bind(&audit_id)
        .bind(&input.domain)
        .bind(&input.start_url)
        .bind(&input.project_name)
        .bind(&input.crawl_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to create audit")?;

        log::info!("[STORE] Created audit {} for {}", audit_id, input.start_url);
        self.get(result.last_insert_rowid()).await
    }

    /// Insert an already-completed audit under a caller-chosen id. Used by
    /// the legacy flat-file importer, which knows the final scores up front.
    pub async fn create_imported(
        &self,
        audit_id: &str,
        input: &NewAudit,
        overall_score: i64,
        crawled_pages: i64,
    ) -> Result<Audit> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO audits (audit_id, domain, start_url, project_name, crawl_id,
                                status, overall_score, crawled_pages, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, 'completed', ?, ?, ?, ?)
            "#,
        )
        .bind(audit_id)
        .bind(&input.domain)
        .bind(&input.start_url)
        .bind(&input.project_name)
        .bind(&input.crawl_id)
        .bind(overall_score)
        .bind(crawled_pages)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .context("Failed to insert imported audit")?;

        self.get(result.last_insert_rowid()).await
    }

    pub async fn get(&self, id: i64) -> Result<Audit> {
        let row = sqlx::query("SELECT * FROM audits WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to fetch audit")?;
        Ok(row_to_audit(&row))
    }

    pub async fn get_by_audit_id(&self, audit_id: &str) -> Result<Option<Audit>> {
        let row = sqlx::query("SELECT * FROM audits WHERE audit_id = ?")
            .bind(audit_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch audit")?;
        Ok(row.map(|r| row_to_audit(&r)))
    }

    /// Mark a running audit completed with its final stats. Fails if the
    /// audit already reached a terminal state.
    pub async fn complete(
        &self,
        id: i64,
        overall_score: i64,
        crawled_pages: i64,
        failed_pages: i64,
    ) -> Result<Audit> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE audits
            SET status = 'completed', overall_score = ?, crawled_pages = ?,
                failed_pages = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(overall_score)
        .bind(crawled_pages)
        .bind(failed_pages)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to complete audit")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("audit {id} is not running; cannot complete"));
        }

        self.get(id).await
    }

    /// Mark a running audit failed. A no-op when the audit already reached a
    /// terminal state (Failed is irreversible, Completed stays completed).
    pub async fn fail(&self, id: i64, error: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            UPDATE audits
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark audit failed")?;

        if result.rows_affected() == 0 {
            log::warn!("[STORE] fail_audit({id}) ignored: audit already terminal");
        } else {
            log::error!("[STORE] Audit {id} failed: {error}");
        }
        Ok(())
    }

    pub async fn list(&self, filters: &AuditFilters) -> Result<Vec<Audit>> {
        let mut qb = sqlx::QueryBuilder::new("SELECT * FROM audits WHERE 1=1");
        if let Some(domain) = &filters.domain {
            qb.push(" AND domain = ").push_bind(domain.clone());
        }
        if let Some(status) = &filters.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
        qb.push(" ORDER BY started_at DESC");
        if let Some(limit) = filters.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list audits")?;
        Ok(rows.iter().map(row_to_audit).collect())
    }

    /// Latest completed audit for a domain, excluding `exclude_id` (the
    /// audit currently being compared).
    pub async fn latest_completed(&self, domain: &str, exclude_id: Option<i64>) -> Result<Option<Audit>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM audits
            WHERE domain = ? AND status = 'completed' AND id != ?
            ORDER BY started_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(domain)
        .bind(exclude_id.unwrap_or(-1))
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest audit")?;
        Ok(row.map(|r| row_to_audit(&r)))
    }

    /// Delete an audit and, via foreign keys, every category, result, issue
    /// and comparison row referencing it.
    pub async fn delete(&self, audit_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM audits WHERE audit_id = ?")
            .bind(audit_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete audit")?;
        log::info!("[STORE] Deleted audit {audit_id}");
        Ok(())
    }

    /// Compute the delta between two completed audits of the same domain:
    /// overall and per-category score differences plus newly-failing and
    /// newly-fixed rule counts (set difference over rule ids with >= 1 fail).
    pub async fn compare(&self, current_id: i64, previous_id: i64) -> Result<Comparison> {
        let current = self.get(current_id).await?;
        let previous = self.get(previous_id).await?;

        let current_categories = self.category_scores(current_id).await?;
        let previous_categories = self.category_scores(previous_id).await?;

        let mut category_deltas = Vec::new();
        for (category_id, current_score) in &current_categories {
            let previous_score = previous_categories
                .iter()
                .find(|(id, _)| id == category_id)
                .map(|(_, s)| *s)
                .unwrap_or(0);
            category_deltas.push(CategoryDelta {
                category_id: category_id.clone(),
                previous_score,
                current_score: *current_score,
                delta: current_score - previous_score,
            });
        }

        let failing_now = self.failing_rule_ids(current_id).await?;
        let failing_before = self.failing_rule_ids(previous_id).await?;

        let new_issues_count = failing_now.difference(&failing_before).count() as i64;
        let fixed_issues_count = failing_before.difference(&failing_now).count() as i64;

        let comparison = Comparison {
            audit_id: current_id,
            previous_audit_id: previous_id,
            score_delta: current.overall_score - previous.overall_score,
            category_deltas,
            new_issues_count,
            fixed_issues_count,
        };

        sqlx::query(
            r#"
            INSERT INTO comparisons
                (audit_id, previous_audit_id, score_delta, category_deltas_json,
                 new_issues_count, fixed_issues_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(current_id)
        .bind(previous_id)
        .bind(comparison.score_delta)
        .bind(serde_json::to_string(&comparison.category_deltas).unwrap_or_default())
        .bind(new_issues_count)
        .bind(fixed_issues_count)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to persist comparison")?;

        Ok(comparison)
    }

    async fn category_scores(&self, audit_pk: i64) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT category_id, score FROM audit_categories WHERE audit_id = ? ORDER BY category_id",
        )
        .bind(audit_pk)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch category scores")?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("category_id"), r.get::<i64, _>("score")))
            .collect())
    }

    async fn failing_rule_ids(&self, audit_pk: i64) -> Result<std::collections::HashSet<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT rule_id FROM audit_results WHERE audit_id = ? AND status = 'fail'",
        )
        .bind(audit_pk)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch failing rule ids")?;

        Ok(rows.iter().map(|r| r.get::<String, _>("rule_id")).collect())
    }
}

fn row_to_audit(row: &sqlx::sqlite::SqliteRow) -> Audit {
    Audit {
        id: row.get("id"),
        audit_id: row.get("audit_id"),
        domain: row.get("domain"),
        start_url: row.get("start_url"),
        project_name: row.get("project_name"),
        crawl_id: row.get("crawl_id"),
        status: map_audit_status(row.get::<String, _>("status").as_str()),
        overall_score: row.get("overall_score"),
        crawled_pages: row.get("crawled_pages"),
        failed_pages: row.get("failed_pages"),
        error_message: row.get("error_message"),
        started_at: parse_datetime(row.get::<String, _>("started_at").as_str()),
        completed_at: row
            .get::<Option<String>, _>("completed_at")
            .as_deref()
            .map(parse_datetime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AuditStatus;
    use crate::test_utils::fixtures;

    fn new_audit(domain: &str) -> NewAudit {
        NewAudit {
            domain: domain.to_string(),
            start_url: format!("https://{domain}/"),
            project_name: None,
            crawl_id: None,
        }
    }

    #[tokio::test]
    async fn test_audit_lifecycle() {
        let pool = fixtures::setup_audits_db().await;
        let repo = AuditRepository::new(pool);

        let audit = repo.create(&new_audit("example.com")).await.unwrap();
        assert_eq!(audit.status, AuditStatus::Running);
        assert_eq!(audit.overall_score, 0);
        assert!(audit.completed_at.is_none());

        let completed = repo.complete(audit.id, 82, 10, 1).await.unwrap();
        assert_eq!(completed.status, AuditStatus::Completed);
        assert_eq!(completed.overall_score, 82);
        assert!(completed.completed_at.is_some());

        // Completing twice is rejected: terminal states are immutable
        assert!(repo.complete(audit.id, 90, 10, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_audit_is_terminal() {
        let pool = fixtures::setup_audits_db().await;
        let repo = AuditRepository::new(pool);

        let audit = repo.create(&new_audit("example.com")).await.unwrap();
        repo.fail(audit.id, "seed unreachable").await.unwrap();

        let failed = repo.get(audit.id).await.unwrap();
        assert_eq!(failed.status, AuditStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("seed unreachable"));

        // Failing again (or completing) does not resurrect it
        repo.fail(audit.id, "other").await.unwrap();
        assert!(repo.complete(audit.id, 50, 1, 0).await.is_err());
        let still = repo.get(audit.id).await.unwrap();
        assert_eq!(still.error_message.as_deref(), Some("seed unreachable"));
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let pool = fixtures::setup_audits_db().await;
        let repo = AuditRepository::new(pool);

        let a = repo.create(&new_audit("a.com")).await.unwrap();
        let _b = repo.create(&new_audit("b.com")).await.unwrap();
        repo.complete(a.id, 70, 5, 0).await.unwrap();

        let all = repo.list(&AuditFilters::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = repo
            .list(&AuditFilters {
                domain: Some("a.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_a.len(), 1);

        let completed = repo
            .list(&AuditFilters {
                status: Some("completed".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].domain, "a.com");
    }

    #[tokio::test]
    async fn test_compare_audits() {
        use crate::domain::models::{CategoryResult, RuleOutcome, RuleResult, RuleStatus};
        use crate::repository::sqlite::ResultRepository;

        let pool = fixtures::setup_audits_db().await;
        let audits = AuditRepository::new(pool.clone());
        let results = ResultRepository::new(pool.clone());

        let outcome = |rule_id: &str, status: RuleStatus| RuleOutcome {
            rule_id: rule_id.to_string(),
            rule_name: rule_id.to_string(),
            category_id: "content".to_string(),
            weight: 1,
            result: RuleResult::new(status, if status == RuleStatus::Fail { 0 } else { 100 }, "m"),
        };
        let category = |score: u8| CategoryResult {
            category_id: "content".to_string(),
            category_name: "Content".to_string(),
            score,
            weight: 3,
            pass_count: 0,
            warn_count: 0,
            fail_count: 0,
            results: vec![],
        };

        // Previous audit: score 65, rules a+b failing
        let previous = audits.create(&new_audit("example.com")).await.unwrap();
        results
            .insert_page_results(
                previous.id,
                "https://example.com/",
                &[
                    outcome("content.a", RuleStatus::Fail),
                    outcome("content.b", RuleStatus::Fail),
                    outcome("content.c", RuleStatus::Pass),
                ],
            )
            .await
            .unwrap();
        results.insert_categories(previous.id, &[category(65)]).await.unwrap();
        audits.complete(previous.id, 65, 5, 0).await.unwrap();

        // Current audit: score 80, rule b fixed, rule c now failing
        let current = audits.create(&new_audit("example.com")).await.unwrap();
        results
            .insert_page_results(
                current.id,
                "https://example.com/",
                &[
                    outcome("content.a", RuleStatus::Fail),
                    outcome("content.b", RuleStatus::Pass),
                    outcome("content.c", RuleStatus::Fail),
                ],
            )
            .await
            .unwrap();
        results.insert_categories(current.id, &[category(78)]).await.unwrap();
        audits.complete(current.id, 80, 5, 0).await.unwrap();

        let comparison = audits.compare(current.id, previous.id).await.unwrap();
        assert_eq!(comparison.score_delta, 15);
        assert_eq!(comparison.new_issues_count, 1, "content.c newly fails");
        assert_eq!(comparison.fixed_issues_count, 1, "content.b was fixed");
        assert_eq!(comparison.category_deltas.len(), 1);
        assert_eq!(comparison.category_deltas[0].delta, 78 - 65);

        // Comparison row persisted
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comparisons")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_latest_completed_excludes_current() {
        let pool = fixtures::setup_audits_db().await;
        let repo = AuditRepository::new(pool);

        let old = repo.create(&new_audit("example.com")).await.unwrap();
        repo.complete(old.id, 65, 5, 0).await.unwrap();
        let current = repo.create(&new_audit("example.com")).await.unwrap();
        repo.complete(current.id, 80, 5, 0).await.unwrap();

        let latest = repo
            .latest_completed("example.com", Some(current.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, old.id);

        assert!(repo
            .latest_completed("other.com", None)
            .await
            .unwrap()
            .is_none());
    }
}

//! Category and rule-result rows for an audit. All multi-row inserts run in
//! a single transaction so concurrent readers never observe a partially
//! written audit.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::map_rule_status;
use crate::domain::models::{CategoryResult, RuleOutcome, RuleResult};

const CHUNK_SIZE: usize = 100;

pub struct ResultRepository {
    pool: SqlitePool,
}

/// A category row as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredCategory {
    pub category_id: String,
    pub category_name: String,
    pub score: i64,
    pub weight: i64,
    pub pass_count: i64,
    pub warn_count: i64,
    pub fail_count: i64,
}

impl ResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the audit's site-level category rows in one transaction.
    pub async fn insert_categories(&self, audit_pk: i64, categories: &[CategoryResult]) -> Result<()> {
        if categories.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut qb = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO audit_categories (
                audit_id, category_id, category_name, score, weight,
                pass_count, warn_count, fail_count
            ) "#,
        );
        qb.push_values(categories, |mut b, c| {
            b.push_bind(audit_pk)
                .push_bind(&c.category_id)
                .push_bind(&c.category_name)
                .push_bind(c.score as i64)
                .push_bind(c.weight as i64)
                .push_bind(c.pass_count as i64)
                .push_bind(c.warn_count as i64)
                .push_bind(c.fail_count as i64);
        });
        qb.build()
            .execute(&mut *tx)
            .await
            .context("Failed to insert audit categories")?;
        tx.commit().await?;

        log::debug!("[STORE] Inserted {} category rows for audit {audit_pk}", categories.len());
        Ok(())
    }

    /// Insert one page's rule results atomically. Results of different pages
    /// are never interleaved within a transaction.
    pub async fn insert_page_results(
        &self,
        audit_pk: i64,
        page_url: &str,
        outcomes: &[RuleOutcome],
    ) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in outcomes.chunks(CHUNK_SIZE) {
            let mut qb = sqlx::QueryBuilder::new(
                r#"
                INSERT INTO audit_results (
                    audit_id, page_url, category_id, rule_id, rule_name,
                    status, score, message, details_json
                ) "#,
            );
            qb.push_values(chunk, |mut b, o| {
                let details_json = if o.result.details.is_empty() {
                    None
                } else {
                    serde_json::to_string(&o.result.details).ok()
                };
                b.push_bind(audit_pk)
                    .push_bind(page_url)
                    .push_bind(&o.category_id)
                    .push_bind(&o.rule_id)
                    .push_bind(&o.rule_name)
                    .push_bind(o.result.status.as_str())
                    .push_bind(o.result.score as i64)
                    .push_bind(&o.result.message)
                    .push_bind(details_json);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert rule results")?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_categories(&self, audit_pk: i64) -> Result<Vec<StoredCategory>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_categories WHERE audit_id = ? ORDER BY category_id",
        )
        .bind(audit_pk)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch audit categories")?;

        Ok(rows
            .iter()
            .map(|r| StoredCategory {
                category_id: r.get("category_id"),
                category_name: r.get("category_name"),
                score: r.get("score"),
                weight: r.get("weight"),
                pass_count: r.get("pass_count"),
                warn_count: r.get("warn_count"),
                fail_count: r.get("fail_count"),
            })
            .collect())
    }

    /// Rule results for one page of an audit, in insertion order.
    pub async fn get_page_results(&self, audit_pk: i64, page_url: &str) -> Result<Vec<RuleOutcome>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_results WHERE audit_id = ? AND page_url = ? ORDER BY id",
        )
        .bind(audit_pk)
        .bind(page_url)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch page results")?;

        Ok(rows.iter().map(row_to_outcome).collect())
    }

    pub async fn get_all_results(&self, audit_pk: i64) -> Result<Vec<(String, RuleOutcome)>> {
        let rows = sqlx::query("SELECT * FROM audit_results WHERE audit_id = ? ORDER BY id")
            .bind(audit_pk)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch audit results")?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("page_url"), row_to_outcome(r)))
            .collect())
    }

    pub async fn count(&self, audit_pk: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM audit_results WHERE audit_id = ?")
            .bind(audit_pk)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count audit results")
    }
}

fn row_to_outcome(row: &sqlx::sqlite::SqliteRow) -> RuleOutcome {
    let details = row
        .get::<Option<String>, _>("details_json")
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    RuleOutcome {
        rule_id: row.get("rule_id"),
        rule_name: row.get("rule_name"),
        category_id: row.get("category_id"),
        weight: 0,
        result: RuleResult {
            status: map_rule_status(row.get::<String, _>("status").as_str()),
            score: row.get::<i64, _>("score") as u8,
            message: row.get("message"),
            details,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{NewAudit, RuleStatus};
    use crate::repository::sqlite::AuditRepository;
    use crate::test_utils::fixtures;

    fn outcome(rule_id: &str, status: RuleStatus, score: u8) -> RuleOutcome {
        RuleOutcome {
            rule_id: rule_id.to_string(),
            rule_name: "Rule".to_string(),
            category_id: "content".to_string(),
            weight: 1,
            result: RuleResult::new(status, score, "message").with_detail("k", "v"),
        }
    }

    async fn create_audit(pool: &SqlitePool) -> i64 {
        AuditRepository::new(pool.clone())
            .create(&NewAudit {
                domain: "example.com".into(),
                start_url: "https://example.com/".into(),
                project_name: None,
                crawl_id: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_results_roundtrip_with_details() {
        let pool = fixtures::setup_audits_db().await;
        let repo = ResultRepository::new(pool.clone());
        let audit_pk = create_audit(&pool).await;

        repo.insert_page_results(
            audit_pk,
            "https://example.com/",
            &[
                outcome("content.title", RuleStatus::Fail, 0),
                outcome("content.word-count", RuleStatus::Pass, 100),
            ],
        )
        .await
        .unwrap();

        let results = repo
            .get_page_results(audit_pk, "https://example.com/")
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].result.status, RuleStatus::Fail);
        assert_eq!(*results[0].result.details.get("k").unwrap(), "v");
    }

    #[tokio::test]
    async fn test_child_rows_require_parent_audit() {
        let pool = fixtures::setup_audits_db().await;
        let repo = ResultRepository::new(pool);

        let err = repo
            .insert_page_results(9999, "https://x.com/", &[outcome("r", RuleStatus::Pass, 100)])
            .await;
        assert!(err.is_err(), "foreign key violation expected");
    }

    #[tokio::test]
    async fn test_cascade_delete_removes_children() {
        let pool = fixtures::setup_audits_db().await;
        let audits = AuditRepository::new(pool.clone());
        let results = ResultRepository::new(pool.clone());

        let audit = audits
            .create(&NewAudit {
                domain: "example.com".into(),
                start_url: "https://example.com/".into(),
                project_name: None,
                crawl_id: None,
            })
            .await
            .unwrap();

        results
            .insert_page_results(
                audit.id,
                "https://example.com/",
                &[outcome("content.title", RuleStatus::Fail, 0)],
            )
            .await
            .unwrap();
        results
            .insert_categories(
                audit.id,
                &[CategoryResult {
                    category_id: "content".into(),
                    category_name: "Content".into(),
                    score: 50,
                    weight: 3,
                    pass_count: 0,
                    warn_count: 0,
                    fail_count: 1,
                    results: vec![],
                }],
            )
            .await
            .unwrap();

        audits.delete(&audit.audit_id).await.unwrap();

        assert_eq!(results.count(audit.id).await.unwrap(), 0);
        assert!(results.get_categories(audit.id).await.unwrap().is_empty());
    }
}

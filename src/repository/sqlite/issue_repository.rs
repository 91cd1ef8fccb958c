//! Issue rows: post-hoc aggregations of rule failures across pages, one row
//! per actionable item.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::map_severity;
use crate::domain::models::{Issue, NewIssue};

pub struct IssueRepository {
    pool: SqlitePool,
}

impl IssueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an audit's issues in a single transaction.
    pub async fn insert_batch(&self, audit_pk: i64, issues: &[NewIssue]) -> Result<()> {
        if issues.is_empty() {
            return Ok(());
        }

        const CHUNK_SIZE: usize = 100;
        let mut tx = self.pool.begin().await?;

        for chunk in issues.chunks(CHUNK_SIZE) {
            let mut qb = sqlx::QueryBuilder::new(
                r#"
                INSERT INTO issues (
                    audit_id, rule_id, category_id, severity, title,
                    description, affected_pages_json, affected_count, priority
                ) "#,
            );
            qb.push_values(chunk, |mut b, issue| {
                b.push_bind(audit_pk)
                    .push_bind(&issue.rule_id)
                    .push_bind(&issue.category_id)
                    .push_bind(issue.severity.as_str())
                    .push_bind(&issue.title)
                    .push_bind(&issue.description)
                    .push_bind(serde_json::to_string(&issue.affected_pages).unwrap_or_default())
                    .push_bind(issue.affected_pages.len() as i64)
                    .push_bind(issue.priority);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert issues")?;
        }

        tx.commit().await?;
        log::debug!("[STORE] Inserted {} issues for audit {audit_pk}", issues.len());
        Ok(())
    }

    /// Issues for an audit, most severe and widest-reaching first.
    pub async fn get_by_audit(&self, audit_pk: i64) -> Result<Vec<Issue>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM issues
            WHERE audit_id = ?
            ORDER BY
                CASE severity WHEN 'critical' THEN 1 ELSE 2 END,
                priority DESC,
                rule_id ASC
            "#,
        )
        .bind(audit_pk)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch issues")?;

        Ok(rows
            .iter()
            .map(|r| Issue {
                id: r.get("id"),
                audit_id: r.get("audit_id"),
                rule_id: r.get("rule_id"),
                category_id: r.get("category_id"),
                severity: map_severity(r.get::<String, _>("severity").as_str()),
                title: r.get("title"),
                description: r.get("description"),
                affected_pages: serde_json::from_str(
                    r.get::<String, _>("affected_pages_json").as_str(),
                )
                .unwrap_or_default(),
                affected_count: r.get("affected_count"),
                priority: r.get("priority"),
            })
            .collect())
    }

    pub async fn count(&self, audit_pk: i64) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM issues WHERE audit_id = ?")
            .bind(audit_pk)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count issues")
    }
}

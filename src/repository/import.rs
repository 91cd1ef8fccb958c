//! One-time importer for legacy flat-file audit reports (one JSON file per
//! run) into the SQLite schema. Idempotent per source file and never aborts
//! the batch on a single bad file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::domain::models::{CategoryResult, NewAudit, RuleOutcome, RuleResult};
use crate::repository::sqlite::{map_rule_status, AuditRepository, ResultRepository};

/// Shape of the legacy per-run JSON report files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyReport {
    url: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    overall_score: i64,
    #[serde(default)]
    crawled_pages: i64,
    #[serde(default)]
    categories: Vec<LegacyCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyCategory {
    id: String,
    #[serde(default)]
    name: Option<String>,
    score: i64,
    #[serde(default = "default_weight")]
    weight: i64,
    #[serde(default)]
    results: Vec<LegacyRuleResult>,
}

fn default_weight() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRuleResult {
    rule_id: String,
    #[serde(default)]
    rule_name: Option<String>,
    status: String,
    score: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    page_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Imported,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub outcomes: Vec<FileOutcome>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Imported))
    }
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped))
    }
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed(_)))
    }
    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Delete each source file after a successful import.
    pub delete_originals: bool,
    /// Copy the original to `<name>.bak` before deleting it.
    pub backup_before_delete: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            delete_originals: false,
            backup_before_delete: true,
        }
    }
}

pub struct LegacyImporter {
    audits: AuditRepository,
    results: ResultRepository,
}

impl LegacyImporter {
    pub fn new(audits_pool: SqlitePool) -> Self {
        Self {
            audits: AuditRepository::new(audits_pool.clone()),
            results: ResultRepository::new(audits_pool),
        }
    }

    /// Import every `*.json` file in `dir`. Each file succeeds or fails on
    /// its own; the report lists the outcome per file.
    pub async fn import_dir(&self, dir: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read import dir: {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect();
        entries.sort();

        for path in entries {
            let status = match self.import_file(&path).await {
                Ok(true) => {
                    if options.delete_originals {
                        if let Err(e) = retire_original(&path, options.backup_before_delete) {
                            log::warn!("[IMPORT] Imported but could not retire {}: {e:#}", path.display());
                        }
                    }
                    FileStatus::Imported
                }
                Ok(false) => FileStatus::Skipped,
                Err(e) => {
                    log::warn!("[IMPORT] Failed to import {}: {e:#}", path.display());
                    FileStatus::Failed(format!("{e:#}"))
                }
            };
            report.outcomes.push(FileOutcome { path, status });
        }

        log::info!(
            "[IMPORT] Done: {} imported, {} skipped, {} failed",
            report.imported(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    /// Import a single legacy file. Returns false when the file was already
    /// migrated (same content hash).
    async fn import_file(&self, path: &Path) -> Result<bool> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let report: LegacyReport =
            serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;

        // Content-derived id makes re-imports of the same file no-ops
        let legacy_id = format!("legacy-{}", &hex::encode(Sha256::digest(raw.as_bytes()))[..16]);
        if self.audits.get_by_audit_id(&legacy_id).await?.is_some() {
            log::debug!("[IMPORT] {} already migrated", path.display());
            return Ok(false);
        }

        let domain = match &report.domain {
            Some(d) => d.clone(),
            None => url::Url::parse(&report.url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .unwrap_or_else(|| report.url.clone()),
        };

        let audit = self
            .audits
            .create_imported(
                &legacy_id,
                &NewAudit {
                    domain,
                    start_url: report.url.clone(),
                    project_name: None,
                    crawl_id: None,
                },
                report.overall_score,
                report.crawled_pages,
            )
            .await?;

        let categories: Vec<CategoryResult> = report
            .categories
            .iter()
            .map(|c| CategoryResult {
                category_id: c.id.clone(),
                category_name: c.name.clone().unwrap_or_else(|| c.id.clone()),
                score: c.score.clamp(0, 100) as u8,
                weight: c.weight.max(0) as u32,
                pass_count: c.results.iter().filter(|r| r.status == "pass").count(),
                warn_count: c.results.iter().filter(|r| r.status == "warn").count(),
                fail_count: c.results.iter().filter(|r| r.status == "fail").count(),
                results: vec![],
            })
            .collect();
        self.results.insert_categories(audit.id, &categories).await?;

        for category in &report.categories {
            let mut by_page: std::collections::BTreeMap<String, Vec<RuleOutcome>> =
                std::collections::BTreeMap::new();
            for result in &category.results {
                let page_url = result.page_url.clone().unwrap_or_else(|| report.url.clone());
                by_page.entry(page_url).or_default().push(RuleOutcome {
                    rule_id: result.rule_id.clone(),
                    rule_name: result
                        .rule_name
                        .clone()
                        .unwrap_or_else(|| result.rule_id.clone()),
                    category_id: category.id.clone(),
                    weight: 1,
                    result: RuleResult::new(
                        map_rule_status(&result.status),
                        result.score.clamp(0, 100) as u8,
                        result.message.clone(),
                    ),
                });
            }
            for (page_url, outcomes) in by_page {
                self.results
                    .insert_page_results(audit.id, &page_url, &outcomes)
                    .await?;
            }
        }

        log::info!("[IMPORT] Migrated {} as {}", path.display(), legacy_id);
        Ok(true)
    }
}

fn retire_original(path: &Path, backup: bool) -> Result<()> {
    if backup {
        let mut backup_path = path.as_os_str().to_owned();
        backup_path.push(".bak");
        std::fs::copy(path, PathBuf::from(&backup_path))
            .with_context(|| format!("failed to back up {}", path.display()))?;
    }
    std::fs::remove_file(path).with_context(|| format!("failed to delete {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::AuditFilters;
    use crate::test_utils::fixtures;

    fn legacy_json(url: &str, score: i64) -> String {
        serde_json::json!({
            "url": url,
            "overallScore": score,
            "crawledPages": 3,
            "categories": [{
                "id": "content",
                "name": "Content",
                "score": score,
                "weight": 3,
                "results": [
                    {"ruleId": "content.title", "status": "fail", "score": 0,
                     "message": "missing title", "pageUrl": format!("{url}a")},
                    {"ruleId": "content.word-count", "status": "pass", "score": 100,
                     "message": "fine"}
                ]
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_import_and_idempotency() {
        let pool = fixtures::setup_audits_db().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("run1.json"), legacy_json("https://a.com/", 70)).unwrap();
        std::fs::write(dir.path().join("run2.json"), legacy_json("https://b.com/", 55)).unwrap();

        let importer = LegacyImporter::new(pool.clone());
        let report = importer
            .import_dir(dir.path(), &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(report.imported(), 2);
        assert_eq!(report.failed(), 0);

        let audits = AuditRepository::new(pool.clone())
            .list(&AuditFilters::default())
            .await
            .unwrap();
        assert_eq!(audits.len(), 2);
        assert!(audits.iter().all(|a| a.audit_id.starts_with("legacy-")));
        assert_eq!(audits.iter().find(|a| a.domain == "a.com").unwrap().overall_score, 70);

        // Second run skips everything
        let again = importer
            .import_dir(dir.path(), &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(again.imported(), 0);
        assert_eq!(again.skipped(), 2);
    }

    #[tokio::test]
    async fn test_bad_file_does_not_abort_batch() {
        let pool = fixtures::setup_audits_db().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("good.json"), legacy_json("https://ok.com/", 90)).unwrap();

        let importer = LegacyImporter::new(pool);
        let report = importer
            .import_dir(dir.path(), &ImportOptions::default())
            .await
            .unwrap();

        assert_eq!(report.imported(), 1);
        assert_eq!(report.failed(), 1);
        let failed = report
            .outcomes
            .iter()
            .find(|o| o.path.ends_with("bad.json"))
            .unwrap();
        assert!(matches!(failed.status, FileStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_delete_with_backup() {
        let pool = fixtures::setup_audits_db().await;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.json");
        std::fs::write(&file, legacy_json("https://a.com/", 70)).unwrap();

        let importer = LegacyImporter::new(pool);
        importer
            .import_dir(
                dir.path(),
                &ImportOptions {
                    delete_originals: true,
                    backup_before_delete: true,
                },
            )
            .await
            .unwrap();

        assert!(!file.exists(), "original should be deleted");
        assert!(dir.path().join("run.json.bak").exists(), "backup should exist");
    }
}

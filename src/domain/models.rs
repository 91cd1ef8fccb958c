//! Domain entities shared across the crawler, engine and storage layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ====== Enums ======

/// Lifecycle state of a persisted audit. `Failed` is terminal and
/// irreversible; `Completed` triggers issue generation and comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditStatus {
    Running,
    Completed,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Running => "running",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuditStatus::Running)
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single rule on a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Pass,
    Warn,
    Fail,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Pass => "pass",
            RuleStatus::Warn => "warn",
            RuleStatus::Fail => "fail",
        }
    }

    /// The more severe of two statuses (Fail > Warn > Pass).
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueSeverity {
    Critical,
    Warning,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Critical => "critical",
            IssueSeverity::Warning => "warning",
        }
    }
}

// ====== Rule results and aggregation ======

/// Result of one rule run. `details` is an open key/value map that
/// round-trips through the persisted `details_json` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub status: RuleStatus,
    pub score: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl RuleResult {
    pub fn new(status: RuleStatus, score: u8, message: impl Into<String>) -> Self {
        Self {
            status,
            score: score.min(100),
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn pass(score: u8, message: impl Into<String>) -> Self {
        Self::new(RuleStatus::Pass, score, message)
    }

    pub fn warn(score: u8, message: impl Into<String>) -> Self {
        Self::new(RuleStatus::Warn, score, message)
    }

    pub fn fail(score: u8, message: impl Into<String>) -> Self {
        Self::new(RuleStatus::Fail, score, message)
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// A rule result paired with the identity of the rule that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub rule_name: String,
    pub category_id: String,
    pub weight: u32,
    pub result: RuleResult,
}

/// Aggregated results for one category: the rounded weighted mean of its
/// rules' scores plus pass/warn/fail counts.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryResult {
    pub category_id: String,
    pub category_name: String,
    pub score: u8,
    pub weight: u32,
    pub pass_count: usize,
    pub warn_count: usize,
    pub fail_count: usize,
    pub results: Vec<RuleOutcome>,
}

/// Top-level result of one audit run, consumed by report renderers.
#[derive(Debug, Clone, Serialize)]
pub struct AuditResult {
    pub audit_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub crawled_pages: usize,
    pub failed_pages: usize,
    pub overall_score: u8,
    pub category_results: Vec<CategoryResult>,
    /// Set when the audit terminated early; the category results gathered
    /// before the failure are still present.
    pub failure: Option<String>,
    pub comparison: Option<Comparison>,
}

// ====== Persisted audit entities ======

#[derive(Debug, Clone, Serialize)]
pub struct Audit {
    pub id: i64,
    pub audit_id: String,
    pub domain: String,
    pub start_url: String,
    pub project_name: Option<String>,
    pub crawl_id: Option<String>,
    pub status: AuditStatus,
    pub overall_score: i64,
    pub crawled_pages: i64,
    pub failed_pages: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewAudit {
    pub domain: String,
    pub start_url: String,
    pub project_name: Option<String>,
    pub crawl_id: Option<String>,
}

/// Time-sortable audit identifier: millisecond timestamp prefix plus a v4
/// uuid for uniqueness. Lexicographic order equals chronological order.
pub fn new_audit_id() -> String {
    format!(
        "{:013}-{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4()
    )
}

/// One actionable item: a rule's failures/warnings aggregated across the
/// pages of an audit. Derived post-hoc from raw results.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub id: i64,
    pub audit_id: i64,
    pub rule_id: String,
    pub category_id: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub affected_pages: Vec<String>,
    pub affected_count: i64,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub rule_id: String,
    pub category_id: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub affected_pages: Vec<String>,
    pub priority: i64,
}

/// Delta between two completed audits of the same domain.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub audit_id: i64,
    pub previous_audit_id: i64,
    pub score_delta: i64,
    pub category_deltas: Vec<CategoryDelta>,
    pub new_issues_count: i64,
    pub fixed_issues_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDelta {
    pub category_id: String,
    pub previous_score: i64,
    pub current_score: i64,
    pub delta: i64,
}

// ====== Crawl entities ======

/// A page as produced by the crawler. `body` is present for successful
/// fetches (and cached replays) so rules can run without refetching.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub final_url: String,
    pub status_code: Option<u16>,
    pub body: Option<String>,
    pub content_hash: Option<String>,
    pub response_time_ms: u64,
    pub size_bytes: usize,
    pub redirect_chain: Vec<String>,
    pub from_cache: bool,
    pub failure: Option<String>,
}

impl CrawledPage {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.status_code.map(|s| s < 400).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_from_cache: usize,
    pub pages_failed: usize,
    pub urls_skipped_offsite: usize,
    pub urls_skipped_robots: usize,
    /// Pages whose content hash matched an earlier page in the same run.
    pub duplicate_pages: usize,
}

#[derive(Debug, Clone)]
pub struct CrawlSummary {
    pub crawl_id: String,
    pub domain: String,
    pub start_url: String,
    pub pages: Vec<CrawledPage>,
    pub stats: CrawlStats,
}

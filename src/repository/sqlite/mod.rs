use chrono::{DateTime, Utc};

use crate::domain::models::{AuditStatus, IssueSeverity, RuleStatus};

mod audit_repository;
mod crawl_repository;
mod issue_repository;
mod link_cache_repository;
mod result_repository;

pub use audit_repository::{AuditFilters, AuditRepository};
pub use crawl_repository::{CrawlRepository, StoredCrawl, StoredPage};
pub use issue_repository::IssueRepository;
pub use link_cache_repository::{CacheEntry, LinkCacheRepository};
pub use result_repository::{ResultRepository, StoredCategory};

pub fn map_audit_status(s: &str) -> AuditStatus {
    match s {
        "completed" => AuditStatus::Completed,
        "failed" => AuditStatus::Failed,
        _ => AuditStatus::Running,
    }
}

pub fn map_rule_status(s: &str) -> RuleStatus {
    match s {
        "pass" => RuleStatus::Pass,
        "warn" => RuleStatus::Warn,
        _ => RuleStatus::Fail,
    }
}

pub fn map_severity(s: &str) -> IssueSeverity {
    match s {
        "critical" => IssueSeverity::Critical,
        _ => IssueSeverity::Warning,
    }
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

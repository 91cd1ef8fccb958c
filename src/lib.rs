//! siteaudit - audits websites for SEO and content-quality issues.
//!
//! The pipeline: a bounded-concurrency [`service::Crawler`] discovers and
//! fetches pages, the [`service::AuditEngine`] runs every registered
//! [`rules::Rule`] against each page and aggregates weighted scores, and the
//! storage layer persists audit runs, per-rule results, derived issues and
//! run-to-run comparisons across two SQLite databases (one global audits
//! store, one crawl/link-cache store per project).

pub mod db;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod lifecycle;
pub mod repository;
pub mod rules;
pub mod service;

#[cfg(test)]
pub mod test_utils;

pub use db::Databases;
pub use domain::models::{AuditResult, CategoryResult, CrawlSummary, RuleResult, RuleStatus};
pub use error::{AuditError, Result};
pub use rules::{register_defaults, Rule, RuleRegistry};
pub use service::{AuditOptions, AuditRunner, CrawlOptions};

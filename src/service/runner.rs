//! Top-level orchestration: `audit_url` drives crawl -> per-page rule
//! execution -> persistence -> aggregation -> issue generation ->
//! comparison. `crawl_only` and `analyze_stored_crawl` are the two narrower
//! entry points.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use url::Url;

use crate::db::Databases;
use crate::domain::models::{
    AuditResult, CategoryResult, Comparison, CrawlSummary, CrawledPage, NewAudit,
};
use crate::error::{AuditError, Result};
use crate::extractor::PageData;
use crate::repository::sqlite::{AuditRepository, IssueRepository, ResultRepository};
use crate::rules::{AuditContext, RuleRegistry};
use crate::service::crawler::{CrawlOptions, Crawler, NoopSink, PageSink};
use crate::service::engine::{aggregate_site, overall_score, AuditEngine};
use crate::service::fetcher::PageFetcher;
use crate::service::issues::generate_issues;

#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub crawl: CrawlOptions,
    /// Categories to run; `None` runs every registered category.
    pub categories: Option<Vec<String>>,
    pub project_name: Option<String>,
    /// Compare against the previous completed audit of the same domain.
    pub compare_with_previous: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            crawl: CrawlOptions::default(),
            categories: None,
            project_name: None,
            compare_with_previous: true,
        }
    }
}

pub struct AuditRunner {
    dbs: Databases,
    engine: Arc<AuditEngine>,
    fetcher: Arc<dyn PageFetcher>,
}

impl AuditRunner {
    pub fn new(dbs: Databases, registry: Arc<RuleRegistry>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            dbs,
            engine: Arc::new(AuditEngine::new(registry)),
            fetcher,
        }
    }

    pub fn with_engine(dbs: Databases, engine: Arc<AuditEngine>, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { dbs, engine, fetcher }
    }

    fn registry(&self) -> &Arc<RuleRegistry> {
        self.engine.registry()
    }

    /// Resolve the selected categories and reject unknown ones before any
    /// network activity.
    fn resolve_categories(&self, requested: &Option<Vec<String>>) -> Result<Vec<String>> {
        match requested {
            None => Ok(self.registry().category_ids()),
            Some(ids) => {
                for id in ids {
                    if self.registry().category(id).is_none() {
                        return Err(AuditError::config(format!("unknown category: {id}")));
                    }
                }
                Ok(ids.clone())
            }
        }
    }

    /// Audit a site: crawl from `url`, run rules on every page, persist
    /// everything, and return the aggregated result.
    ///
    /// A mid-run storage failure marks the audit `failed` and yields a
    /// result tagged with the failure but still carrying the category
    /// results gathered so far; an unreachable seed is returned as an error.
    pub async fn audit_url(&self, url: &str, options: &AuditOptions) -> Result<AuditResult> {
        let seed = Url::parse(url).map_err(|e| AuditError::InvalidUrl(format!("{url}: {e}")))?;
        options.crawl.validate()?;
        let categories = self.resolve_categories(&options.categories)?;

        let domain = seed
            .host_str()
            .ok_or_else(|| AuditError::InvalidUrl(format!("{url} has no host")))?
            .to_string();

        // Cross-page rule state belongs to exactly one audit
        self.registry().reset_stateful_rules();

        let audits = AuditRepository::new(self.dbs.audits.clone());
        let audit = audits
            .create(&NewAudit {
                domain: domain.clone(),
                start_url: seed.to_string(),
                project_name: options.project_name.clone(),
                crawl_id: None,
            })
            .await?;

        let sink = AuditingSink {
            engine: self.engine.clone(),
            results: ResultRepository::new(self.dbs.audits.clone()),
            audit_pk: audit.id,
            categories: categories.clone(),
            collected: Mutex::new(Vec::new()),
        };

        let crawler = Crawler::new(self.fetcher.clone(), self.dbs.crawl.clone(), options.crawl.clone());
        let crawl_outcome = crawler.crawl(&seed, &sink).await;

        let per_page = sink.collected.into_inner();

        match crawl_outcome {
            Ok(summary) => {
                self.finalize_audit(&audits, audit.id, &audit.audit_id, &seed, &domain, per_page, &summary, options)
                    .await
            }
            Err(e @ AuditError::SeedUnreachable { .. }) => {
                audits.fail(audit.id, &e.to_string()).await?;
                Err(e)
            }
            Err(e) => {
                // Mid-run failure (storage, sink): never leave the audit
                // `running`, and hand back what was gathered before it broke.
                let message = e.to_string();
                audits.fail(audit.id, &message).await?;
                let site_categories = aggregate_site(&per_page.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>());
                Ok(AuditResult {
                    audit_id: audit.audit_id,
                    url: seed.to_string(),
                    timestamp: Utc::now(),
                    crawled_pages: per_page.len(),
                    failed_pages: 0,
                    overall_score: overall_score(&site_categories),
                    category_results: site_categories,
                    failure: Some(message),
                    comparison: None,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize_audit(
        &self,
        audits: &AuditRepository,
        audit_pk: i64,
        audit_id: &str,
        seed: &Url,
        domain: &str,
        per_page: Vec<(String, Vec<CategoryResult>)>,
        summary: &CrawlSummary,
        options: &AuditOptions,
    ) -> Result<AuditResult> {
        let results = ResultRepository::new(self.dbs.audits.clone());
        let issues = IssueRepository::new(self.dbs.audits.clone());

        let site_categories = aggregate_site(&per_page.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>());
        let score = overall_score(&site_categories);

        results.insert_categories(audit_pk, &site_categories).await?;
        issues
            .insert_batch(audit_pk, &generate_issues(&per_page))
            .await?;

        let completed = audits
            .complete(
                audit_pk,
                score as i64,
                summary.pages.len() as i64,
                summary.stats.pages_failed as i64,
            )
            .await?;

        let comparison = if options.compare_with_previous {
            self.compare_with_previous(audits, domain, audit_pk).await?
        } else {
            None
        };

        log::info!(
            "[AUDIT] {} completed: score {} over {} pages",
            audit_id,
            score,
            summary.pages.len()
        );

        Ok(AuditResult {
            audit_id: audit_id.to_string(),
            url: seed.to_string(),
            timestamp: completed.completed_at.unwrap_or_else(Utc::now),
            crawled_pages: summary.pages.len(),
            failed_pages: summary.stats.pages_failed,
            overall_score: score,
            category_results: site_categories,
            failure: None,
            comparison,
        })
    }

    async fn compare_with_previous(
        &self,
        audits: &AuditRepository,
        domain: &str,
        current_pk: i64,
    ) -> Result<Option<Comparison>> {
        match audits.latest_completed(domain, Some(current_pk)).await? {
            Some(previous) => {
                let comparison = audits.compare(current_pk, previous.id).await?;
                log::info!(
                    "[AUDIT] Compared with {}: delta {:+}, {} new / {} fixed",
                    previous.audit_id,
                    comparison.score_delta,
                    comparison.new_issues_count,
                    comparison.fixed_issues_count
                );
                Ok(Some(comparison))
            }
            None => Ok(None),
        }
    }

    /// Crawl without rule execution.
    pub async fn crawl_only(&self, url: &str, max_pages: usize, options: &CrawlOptions) -> Result<CrawlSummary> {
        let seed = Url::parse(url).map_err(|e| AuditError::InvalidUrl(format!("{url}: {e}")))?;
        let mut options = options.clone();
        options.max_pages = max_pages;
        options.validate()?;

        let crawler = Crawler::new(self.fetcher.clone(), self.dbs.crawl.clone(), options);
        crawler.crawl(&seed, &NoopSink).await
    }

    /// Run rules against the pages of a previously persisted crawl, without
    /// any new fetches.
    pub async fn analyze_stored_crawl(
        &self,
        crawl_id: &str,
        categories: Option<Vec<String>>,
    ) -> Result<AuditResult> {
        let categories = self.resolve_categories(&categories)?;

        let crawl_repo = crate::repository::sqlite::CrawlRepository::new(self.dbs.crawl.clone());
        let crawl = crawl_repo
            .get(crawl_id)
            .await?
            .ok_or_else(|| AuditError::CrawlNotFound(crawl_id.to_string()))?;
        let stored_pages = crawl_repo.pages_for_crawl(crawl_id).await?;

        self.registry().reset_stateful_rules();

        let audits = AuditRepository::new(self.dbs.audits.clone());
        let results = ResultRepository::new(self.dbs.audits.clone());
        let issues = IssueRepository::new(self.dbs.audits.clone());

        let audit = audits
            .create(&NewAudit {
                domain: crawl.domain.clone(),
                start_url: crawl.start_url.clone(),
                project_name: None,
                crawl_id: Some(crawl_id.to_string()),
            })
            .await?;

        match self
            .run_stored_analysis(&audits, &results, &issues, &audit, &crawl, &stored_pages, &categories)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                audits.fail(audit.id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stored_analysis(
        &self,
        audits: &AuditRepository,
        results: &ResultRepository,
        issues: &IssueRepository,
        audit: &crate::domain::models::Audit,
        crawl: &crate::repository::sqlite::StoredCrawl,
        stored_pages: &[crate::repository::sqlite::StoredPage],
        categories: &[String],
    ) -> Result<AuditResult> {
        let mut per_page: Vec<(String, Vec<CategoryResult>)> = Vec::new();
        let mut failed_pages = 0usize;

        for stored in stored_pages {
            let page = CrawledPage {
                url: stored.url.clone(),
                final_url: stored.final_url.clone().unwrap_or_else(|| stored.url.clone()),
                status_code: stored.status_code.map(|s| s as u16),
                body: stored.body.clone(),
                content_hash: stored.content_hash.clone(),
                response_time_ms: stored.response_time_ms as u64,
                size_bytes: stored.size_bytes as usize,
                redirect_chain: vec![],
                from_cache: true,
                failure: stored.failure.clone(),
            };
            if page.failure.is_some() {
                failed_pages += 1;
            }

            let ctx = AuditContext::from_page(&page, self.registry().state())
                .context("failed to build audit context")?;
            let page_categories = self.engine.audit_page(Arc::new(ctx), categories).await;

            let outcomes: Vec<_> = page_categories
                .iter()
                .flat_map(|c| c.results.iter().cloned())
                .collect();
            results
                .insert_page_results(audit.id, &page.url, &outcomes)
                .await?;
            per_page.push((page.url.clone(), page_categories));
        }

        let site_categories = aggregate_site(&per_page.iter().map(|(_, c)| c.clone()).collect::<Vec<_>>());
        let score = overall_score(&site_categories);

        results.insert_categories(audit.id, &site_categories).await?;
        issues
            .insert_batch(audit.id, &generate_issues(&per_page))
            .await?;
        let completed = audits
            .complete(audit.id, score as i64, per_page.len() as i64, failed_pages as i64)
            .await?;

        Ok(AuditResult {
            audit_id: audit.audit_id.clone(),
            url: crawl.start_url.clone(),
            timestamp: completed.completed_at.unwrap_or_else(Utc::now),
            crawled_pages: per_page.len(),
            failed_pages,
            overall_score: score,
            category_results: site_categories,
            failure: None,
            comparison: None,
        })
    }
}

/// Sink plugged into the crawler: audits every page as it completes and
/// persists its rule results atomically.
struct AuditingSink {
    engine: Arc<AuditEngine>,
    results: ResultRepository,
    audit_pk: i64,
    categories: Vec<String>,
    collected: Mutex<Vec<(String, Vec<CategoryResult>)>>,
}

#[async_trait]
impl PageSink for AuditingSink {
    async fn on_page(&self, page: &CrawledPage, _data: Option<&PageData>) -> anyhow::Result<()> {
        let ctx = AuditContext::from_page(page, self.engine.registry().state())
            .context("failed to build audit context")?;
        let categories = self.engine.audit_page(Arc::new(ctx), &self.categories).await;

        let outcomes: Vec<_> = categories
            .iter()
            .flat_map(|c| c.results.iter().cloned())
            .collect();
        self.results
            .insert_page_results(self.audit_pk, &page.url, &outcomes)
            .await?;

        self.collected.lock().await.push((page.url.clone(), categories));
        Ok(())
    }
}

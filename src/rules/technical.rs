//! Technical rules: HTTP status, indexability, canonical, viewport,
//! structured data, response time and URL format.

use std::sync::Arc;
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::domain::models::RuleResult;
use crate::rules::{AuditContext, Rule, RuleRegistry};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Arc::new(HttpStatusRule));
    registry.register(Arc::new(IndexableRule));
    registry.register(Arc::new(CanonicalRule));
    registry.register(Arc::new(ViewportRule));
    registry.register(Arc::new(StructuredDataRule));
    registry.register(Arc::new(ResponseTimeRule));
    registry.register(Arc::new(UrlFormatRule));
}

/// The page fetch succeeded with a non-error status.
pub struct HttpStatusRule;

#[async_trait]
impl Rule for HttpStatusRule {
    fn id(&self) -> &'static str {
        "technical.http-status"
    }
    fn name(&self) -> &'static str {
        "HTTP Status"
    }
    fn category(&self) -> &'static str {
        "technical"
    }
    fn weight(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        if let Some(failure) = &ctx.fetch_failure {
            return Ok(RuleResult::fail(0, format!("Page could not be fetched: {failure}")));
        }

        let result = match ctx.status_code {
            Some(status) if status >= 400 => {
                RuleResult::fail(0, format!("Page returned status code {status}"))
            }
            Some(status) if !ctx.redirect_chain.is_empty() => RuleResult::warn(
                70,
                format!(
                    "Page reached via {} redirect(s), final status {status}",
                    ctx.redirect_chain.len()
                ),
            )
            .with_detail("redirect_chain", ctx.redirect_chain.clone()),
            Some(status) => RuleResult::pass(100, format!("Page returned status code {status}")),
            None => RuleResult::fail(0, "No HTTP status recorded for page"),
        };
        Ok(result)
    }
}

/// No `noindex` robots directive.
pub struct IndexableRule;

#[async_trait]
impl Rule for IndexableRule {
    fn id(&self) -> &'static str {
        "technical.indexable"
    }
    fn name(&self) -> &'static str {
        "Indexable"
    }
    fn category(&self) -> &'static str {
        "technical"
    }
    fn weight(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        match &ctx.page.robots_meta {
            Some(robots) if robots.to_lowercase().contains("noindex") => Ok(RuleResult::fail(
                0,
                "Page has a noindex directive",
            )
            .with_detail("robots", robots.clone())),
            Some(robots) => {
                Ok(RuleResult::pass(100, "Page is indexable").with_detail("robots", robots.clone()))
            }
            None => Ok(RuleResult::pass(100, "No robots meta tag (indexable by default)")),
        }
    }
}

/// Canonical link present.
pub struct CanonicalRule;

#[async_trait]
impl Rule for CanonicalRule {
    fn id(&self) -> &'static str {
        "technical.canonical"
    }
    fn name(&self) -> &'static str {
        "Canonical URL"
    }
    fn category(&self) -> &'static str {
        "technical"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        match &ctx.page.canonical_url {
            Some(canonical) => {
                let matches = ctx
                    .url
                    .join(canonical)
                    .map(|u| u.as_str() == ctx.url.as_str())
                    .unwrap_or(false);
                let message = if matches {
                    "Canonical URL matches the page URL"
                } else {
                    "Canonical URL points to a different page"
                };
                Ok(RuleResult::pass(100, message).with_detail("canonical", canonical.clone()))
            }
            None => Ok(RuleResult::warn(50, "Missing canonical URL")),
        }
    }
}

/// Mobile viewport configured.
pub struct ViewportRule;

#[async_trait]
impl Rule for ViewportRule {
    fn id(&self) -> &'static str {
        "technical.viewport"
    }
    fn name(&self) -> &'static str {
        "Viewport"
    }
    fn category(&self) -> &'static str {
        "technical"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        match &ctx.page.viewport {
            Some(v) if v.contains("width=device-width") => {
                Ok(RuleResult::pass(100, "Viewport is properly configured"))
            }
            Some(_) => Ok(RuleResult::warn(50, "Viewport missing width=device-width")),
            None => Ok(RuleResult::fail(0, "Missing viewport meta tag")),
        }
    }
}

/// JSON-LD structured data present.
pub struct StructuredDataRule;

#[async_trait]
impl Rule for StructuredDataRule {
    fn id(&self) -> &'static str {
        "technical.structured-data"
    }
    fn name(&self) -> &'static str {
        "Structured Data"
    }
    fn category(&self) -> &'static str {
        "technical"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        if ctx.page.has_structured_data {
            Ok(RuleResult::pass(100, "Page declares JSON-LD structured data"))
        } else {
            Ok(RuleResult::warn(70, "No structured data found"))
        }
    }
}

/// Server response time within budget.
pub struct ResponseTimeRule;

#[async_trait]
impl Rule for ResponseTimeRule {
    fn id(&self) -> &'static str {
        "technical.response-time"
    }
    fn name(&self) -> &'static str {
        "Response Time"
    }
    fn category(&self) -> &'static str {
        "technical"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let ms = ctx.response_time_ms;
        let result = if ms > 5000 {
            RuleResult::fail(25, format!("Page responded in {ms}ms"))
        } else if ms > 3000 {
            RuleResult::warn(50, format!("Slow response: {ms}ms"))
        } else {
            RuleResult::pass(100, format!("Page responded in {ms}ms"))
        };
        Ok(result.with_detail("response_time_ms", ms))
    }
}

/// URL path avoids uppercase letters, underscores and excessive depth.
pub struct UrlFormatRule;

fn messy_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Z_]|%20").unwrap())
}

#[async_trait]
impl Rule for UrlFormatRule {
    fn id(&self) -> &'static str {
        "technical.url-format"
    }
    fn name(&self) -> &'static str {
        "URL Format"
    }
    fn category(&self) -> &'static str {
        "technical"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let path = ctx.url.path();
        let depth = path.split('/').filter(|s| !s.is_empty()).count();

        if messy_path_re().is_match(path) {
            return Ok(RuleResult::warn(
                60,
                "URL path contains uppercase letters, underscores or encoded spaces",
            )
            .with_detail("path", path));
        }
        if depth > 5 {
            return Ok(RuleResult::warn(70, format!("URL is {depth} levels deep")));
        }
        Ok(RuleResult::pass(100, "URL format is clean"))
    }
}

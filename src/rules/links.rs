//! Link rules: crawlability and anchor text quality.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::RuleResult;
use crate::rules::{AuditContext, Rule, RuleRegistry};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Arc::new(CrawlableAnchorsRule));
    registry.register(Arc::new(AnchorTextRule));
    registry.register(Arc::new(InternalNofollowRule));
}

/// Anchors resolve to real URLs the crawler could follow. The extractor
/// already drops javascript:/mailto:/fragment-only hrefs, so here we check
/// the ones it kept but could not resolve.
pub struct CrawlableAnchorsRule;

#[async_trait]
impl Rule for CrawlableAnchorsRule {
    fn id(&self) -> &'static str {
        "links.crawlable-anchors"
    }
    fn name(&self) -> &'static str {
        "Crawlable Anchors"
    }
    fn category(&self) -> &'static str {
        "links"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let total = ctx.page.links.len();
        if total == 0 {
            return Ok(RuleResult::pass(100, "No links found on page"));
        }

        let unresolvable = ctx
            .page
            .links
            .iter()
            .filter(|l| l.href == l.raw_href && !l.raw_href.contains("://"))
            .count();

        if unresolvable == 0 {
            Ok(RuleResult::pass(100, format!("All {total} links are crawlable")))
        } else {
            let pct = ((total - unresolvable) as f64 / total as f64) * 100.0;
            Ok(RuleResult::warn(
                pct.round() as u8,
                format!("{unresolvable} of {total} links could not be resolved"),
            )
            .with_detail("unresolvable", unresolvable))
        }
    }
}

/// Anchors carry descriptive text rather than generic phrases.
pub struct AnchorTextRule;

const GENERIC_ANCHOR_TEXT: &[&str] = &["click here", "read more", "learn more", "here", "link", "more"];

#[async_trait]
impl Rule for AnchorTextRule {
    fn id(&self) -> &'static str {
        "links.anchor-text"
    }
    fn name(&self) -> &'static str {
        "Descriptive Anchor Text"
    }
    fn category(&self) -> &'static str {
        "links"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let total = ctx.page.links.len();
        if total == 0 {
            return Ok(RuleResult::pass(100, "No links found on page"));
        }

        let poor = ctx
            .page
            .links
            .iter()
            .filter(|l| {
                let text = l.text.trim().to_lowercase();
                text.is_empty() || GENERIC_ANCHOR_TEXT.contains(&text.as_str())
            })
            .count();

        if poor == 0 {
            return Ok(RuleResult::pass(100, "All links have descriptive text"));
        }

        let good_pct = ((total - poor) as f64 / total as f64) * 100.0;
        let result = if good_pct < 50.0 {
            RuleResult::fail(good_pct.round() as u8, format!("{poor} of {total} links have generic or empty text"))
        } else {
            RuleResult::warn(good_pct.round() as u8, format!("{poor} of {total} links have generic or empty text"))
        };
        Ok(result.with_detail("generic_links", poor))
    }
}

/// Internal links should not be nofollowed.
pub struct InternalNofollowRule;

#[async_trait]
impl Rule for InternalNofollowRule {
    fn id(&self) -> &'static str {
        "links.internal-nofollow"
    }
    fn name(&self) -> &'static str {
        "Internal Nofollow"
    }
    fn category(&self) -> &'static str {
        "links"
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let nofollowed: Vec<&str> = ctx
            .page
            .internal_links()
            .filter(|l| l.nofollow)
            .map(|l| l.href.as_str())
            .collect();

        if nofollowed.is_empty() {
            Ok(RuleResult::pass(100, "No internal links are nofollowed"))
        } else {
            Ok(RuleResult::warn(
                40,
                format!("{} internal link(s) carry rel=nofollow", nofollowed.len()),
            )
            .with_detail(
                "links",
                nofollowed.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            ))
        }
    }
}

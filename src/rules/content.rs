//! Content rules: titles, descriptions, headings, body text.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::RuleResult;
use crate::rules::{AuditContext, Rule, RuleRegistry};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Arc::new(TitleRule));
    registry.register(Arc::new(MetaDescriptionRule));
    registry.register(Arc::new(SingleH1Rule));
    registry.register(Arc::new(WordCountRule));
    registry.register(Arc::new(DuplicateTitleRule));
    registry.register(Arc::new(DuplicateDescriptionRule));
}

/// Title presence and length (30-60 characters recommended).
pub struct TitleRule;

#[async_trait]
impl Rule for TitleRule {
    fn id(&self) -> &'static str {
        "content.title"
    }
    fn name(&self) -> &'static str {
        "Title Tag"
    }
    fn description(&self) -> &'static str {
        "The page has a title tag of a reasonable length"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let Some(title) = &ctx.page.title else {
            return Ok(RuleResult::fail(0, "Page has no title tag"));
        };

        let len = title.chars().count();
        let result = if len < 30 {
            RuleResult::warn(60, format!("Title too short ({len} chars, recommend 30-60)"))
        } else if len > 60 {
            RuleResult::warn(70, format!("Title too long ({len} chars, recommend 30-60)"))
        } else {
            RuleResult::pass(100, format!("Title length is good ({len} chars)"))
        };

        Ok(result.with_detail("title", title.clone()).with_detail("length", len))
    }
}

/// Meta description presence and length (70-160 characters recommended).
pub struct MetaDescriptionRule;

#[async_trait]
impl Rule for MetaDescriptionRule {
    fn id(&self) -> &'static str {
        "content.meta-description"
    }
    fn name(&self) -> &'static str {
        "Meta Description"
    }
    fn description(&self) -> &'static str {
        "The page has a meta description of a reasonable length"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let Some(desc) = &ctx.page.meta_description else {
            return Ok(RuleResult::fail(0, "Page has no meta description"));
        };

        let len = desc.chars().count();
        let result = if len < 70 {
            RuleResult::warn(50, format!("Description too short ({len} chars, recommend 70-160)"))
        } else if len > 160 {
            RuleResult::warn(70, format!("Description too long ({len} chars, recommend 70-160)"))
        } else {
            RuleResult::pass(100, format!("Description length is good ({len} chars)"))
        };

        Ok(result.with_detail("length", len))
    }
}

/// Exactly one H1 per page.
pub struct SingleH1Rule;

#[async_trait]
impl Rule for SingleH1Rule {
    fn id(&self) -> &'static str {
        "content.single-h1"
    }
    fn name(&self) -> &'static str {
        "Single H1 Heading"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let count = ctx.page.heading_count(1);
        let result = match count {
            0 => RuleResult::fail(0, "Page has no H1 heading"),
            1 => RuleResult::pass(100, "Page has exactly one H1 heading"),
            n => RuleResult::warn(50, format!("Page has {n} H1 headings")),
        };
        Ok(result.with_detail("h1_count", count))
    }
}

/// Thin content detection: word count below 300 is flagged.
pub struct WordCountRule;

#[async_trait]
impl Rule for WordCountRule {
    fn id(&self) -> &'static str {
        "content.word-count"
    }
    fn name(&self) -> &'static str {
        "Content Length"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let words = ctx.page.word_count;
        let result = if words < 100 {
            RuleResult::fail(25, format!("Page only has {words} words"))
        } else if words < 300 {
            RuleResult::warn(60, format!("Thin content: {words} words (aim for 300+)"))
        } else {
            RuleResult::pass(100, format!("Page has {words} words"))
        };
        Ok(result.with_detail("word_count", words))
    }
}

/// Cross-page duplicate title detection (stateful).
pub struct DuplicateTitleRule;

#[async_trait]
impl Rule for DuplicateTitleRule {
    fn id(&self) -> &'static str {
        "content.duplicate-title"
    }
    fn name(&self) -> &'static str {
        "Duplicate Title"
    }
    fn description(&self) -> &'static str {
        "The title is not reused verbatim by another page of this site"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let Some(title) = &ctx.page.title else {
            // Missing titles are content.title's problem
            return Ok(RuleResult::pass(100, "No title to compare"));
        };

        match ctx.state.record("title", title, ctx.url.as_str()) {
            Some(first) if first != ctx.url.as_str() => Ok(RuleResult::fail(
                20,
                format!("Title duplicates the one on {first}"),
            )
            .with_detail("first_seen", first)),
            _ => Ok(RuleResult::pass(100, "Title is unique across crawled pages")),
        }
    }
}

/// Cross-page duplicate meta description detection (stateful).
pub struct DuplicateDescriptionRule;

#[async_trait]
impl Rule for DuplicateDescriptionRule {
    fn id(&self) -> &'static str {
        "content.duplicate-description"
    }
    fn name(&self) -> &'static str {
        "Duplicate Meta Description"
    }
    fn category(&self) -> &'static str {
        "content"
    }
    fn weight(&self) -> u32 {
        2
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let Some(desc) = &ctx.page.meta_description else {
            return Ok(RuleResult::pass(100, "No description to compare"));
        };

        match ctx.state.record("description", desc, ctx.url.as_str()) {
            Some(first) if first != ctx.url.as_str() => Ok(RuleResult::fail(
                20,
                format!("Meta description duplicates the one on {first}"),
            )
            .with_detail("first_seen", first)),
            _ => Ok(RuleResult::pass(100, "Meta description is unique across crawled pages")),
        }
    }
}

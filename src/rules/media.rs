//! Media rules: image accessibility.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::RuleResult;
use crate::rules::{AuditContext, Rule, RuleRegistry};

pub fn register(registry: &mut RuleRegistry) {
    registry.register(Arc::new(ImageAltRule));
}

/// Every image carries a non-empty alt attribute. The score is the share of
/// images with alt text.
pub struct ImageAltRule;

#[async_trait]
impl Rule for ImageAltRule {
    fn id(&self) -> &'static str {
        "media.image-alt"
    }
    fn name(&self) -> &'static str {
        "Image Alt Text"
    }
    fn category(&self) -> &'static str {
        "media"
    }
    fn weight(&self) -> u32 {
        3
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult> {
        let total = ctx.page.images.len();
        if total == 0 {
            return Ok(RuleResult::pass(100, "No images found on page"));
        }

        let missing = ctx.page.images_without_alt();
        let with_alt = total - missing;
        let score = ((with_alt as f64 / total as f64) * 100.0).round() as u8;

        let result = if missing == 0 {
            RuleResult::pass(100, format!("All {total} images have alt attributes"))
        } else if with_alt == 0 {
            RuleResult::fail(0, format!("None of the {total} images have alt text"))
        } else {
            RuleResult::warn(score, format!("{missing} of {total} images lack alt text"))
        };

        Ok(result
            .with_detail("images", total)
            .with_detail("missing_alt", missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RuleStatus;

    #[tokio::test]
    async fn test_image_alt_ratio() {
        let half = AuditContext::for_html(
            "https://example.com/",
            r#"<html><body><img src="a.jpg" alt="desc"><img src="b.jpg"></body></html>"#,
        );
        let result = ImageAltRule.run(&half).await.unwrap();
        assert_eq!(result.status, RuleStatus::Warn);
        assert_eq!(result.score, 50);

        let none = AuditContext::for_html(
            "https://example.com/",
            r#"<html><body><img src="a.jpg"><img src="b.jpg"></body></html>"#,
        );
        assert_eq!(ImageAltRule.run(&none).await.unwrap().status, RuleStatus::Fail);

        let empty = AuditContext::for_html("https://example.com/", "<html><body></body></html>");
        assert_eq!(ImageAltRule.run(&empty).await.unwrap().status, RuleStatus::Pass);
    }
}

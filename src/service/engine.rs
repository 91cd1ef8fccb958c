//! Rule execution and score aggregation for one page, plus site-level
//! aggregation across pages.
//!
//! Scoring is two-stage: rule scores are combined into a rounded category
//! score, then the rounded category scores are combined into the overall
//! score. The intermediate rounding is part of the observable contract and
//! is pinned by tests; it is not interchangeable with a single-pass weighted
//! mean across all rules.

use std::sync::Arc;

use crate::domain::models::{CategoryResult, RuleOutcome, RuleResult, RuleStatus};
use crate::rules::{AuditContext, RuleRegistry};

/// Lifecycle callbacks fired while auditing a page. Order per page:
/// category-start, each rule-complete, category-complete; page-complete
/// after all categories.
pub trait AuditProgress: Send + Sync {
    fn on_category_start(&self, _page_url: &str, _category_id: &str) {}
    fn on_rule_complete(&self, _page_url: &str, _outcome: &RuleOutcome) {}
    fn on_category_complete(&self, _page_url: &str, _result: &CategoryResult) {}
    fn on_page_complete(&self, _page_url: &str, _results: &[CategoryResult]) {}
}

pub struct NoopProgress;

impl AuditProgress for NoopProgress {}

pub struct AuditEngine {
    registry: Arc<RuleRegistry>,
    progress: Arc<dyn AuditProgress>,
}

impl AuditEngine {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(registry: Arc<RuleRegistry>, progress: Arc<dyn AuditProgress>) -> Self {
        Self { registry, progress }
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Run every registered rule of the selected categories against one
    /// page. Rules within a category run concurrently; a rule that errors or
    /// panics is converted into a synthetic fail result and never aborts its
    /// siblings.
    pub async fn audit_page(
        &self,
        ctx: Arc<AuditContext>,
        category_ids: &[String],
    ) -> Vec<CategoryResult> {
        let page_url = ctx.url.to_string();
        let mut results = Vec::with_capacity(category_ids.len());

        for category_id in category_ids {
            let Some(category) = self.registry.category(category_id) else {
                log::warn!("[ENGINE] Skipping unknown category: {category_id}");
                continue;
            };
            let rules = self.registry.rules_for_category(category_id);
            if rules.is_empty() {
                continue;
            }

            self.progress.on_category_start(&page_url, category_id);

            let handles: Vec<_> = rules
                .iter()
                .map(|rule| {
                    let rule = rule.clone();
                    let ctx = ctx.clone();
                    tokio::spawn(async move { rule.run(&ctx).await })
                })
                .collect();

            let mut outcomes = Vec::with_capacity(rules.len());
            for (rule, handle) in rules.iter().zip(handles) {
                let result = match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        log::warn!("[ENGINE] Rule {} errored on {}: {:#}", rule.id(), page_url, e);
                        synthetic_failure(format!("Rule error: {e:#}"))
                    }
                    Err(join_err) => {
                        log::error!(
                            "[ENGINE] Rule {} panicked on {}: {}",
                            rule.id(),
                            page_url,
                            join_err
                        );
                        synthetic_failure(format!("Rule panicked: {join_err}"))
                    }
                };

                let outcome = RuleOutcome {
                    rule_id: rule.id().to_string(),
                    rule_name: rule.name().to_string(),
                    category_id: category_id.clone(),
                    weight: rule.weight(),
                    result,
                };
                self.progress.on_rule_complete(&page_url, &outcome);
                outcomes.push(outcome);
            }

            let result = aggregate_category(category_id, &category.name, category.weight, outcomes);
            self.progress.on_category_complete(&page_url, &result);
            results.push(result);
        }

        self.progress.on_page_complete(&page_url, &results);
        results
    }
}

fn synthetic_failure(message: String) -> RuleResult {
    RuleResult::fail(0, message).with_detail("synthetic", true)
}

/// Weighted mean of (score, weight) pairs, rounded to the nearest integer.
/// Commutative, so evaluation order never changes the result.
fn weighted_mean_rounded(pairs: impl Iterator<Item = (f64, f64)>) -> u8 {
    let (sum, total_weight) = pairs.fold((0.0, 0.0), |(sum, total), (score, weight)| {
        (sum + score * weight, total + weight)
    });
    if total_weight == 0.0 {
        return 0;
    }
    (sum / total_weight).round() as u8
}

/// Fold rule outcomes into one category result. The category score is the
/// weighted mean of the rule scores, rounded here before it feeds into the
/// overall score.
pub fn aggregate_category(
    category_id: &str,
    category_name: &str,
    weight: u32,
    outcomes: Vec<RuleOutcome>,
) -> CategoryResult {
    let score = weighted_mean_rounded(
        outcomes
            .iter()
            .map(|o| (o.result.score as f64, o.weight as f64)),
    );

    let count_of = |status: RuleStatus| outcomes.iter().filter(|o| o.result.status == status).count();

    CategoryResult {
        category_id: category_id.to_string(),
        category_name: category_name.to_string(),
        score,
        weight,
        pass_count: count_of(RuleStatus::Pass),
        warn_count: count_of(RuleStatus::Warn),
        fail_count: count_of(RuleStatus::Fail),
        results: outcomes,
    }
}

/// Weight-normalized mean of the (already rounded) category scores.
pub fn overall_score(categories: &[CategoryResult]) -> u8 {
    weighted_mean_rounded(
        categories
            .iter()
            .map(|c| (c.score as f64, c.weight as f64)),
    )
}

/// Collapse per-page category results into site-level ones: each rule's
/// site score is the mean of its per-page scores, its status the worst
/// observed, and the category/overall aggregation then runs on top of those.
pub fn aggregate_site(per_page: &[Vec<CategoryResult>]) -> Vec<CategoryResult> {
    use std::collections::BTreeMap;

    // (category_id, rule_id) -> accumulated outcomes, BTreeMap for
    // deterministic output order.
    let mut by_rule: BTreeMap<(String, String), Vec<&RuleOutcome>> = BTreeMap::new();
    let mut category_meta: BTreeMap<String, (String, u32)> = BTreeMap::new();

    for page in per_page {
        for category in page {
            category_meta
                .entry(category.category_id.clone())
                .or_insert_with(|| (category.category_name.clone(), category.weight));
            for outcome in &category.results {
                by_rule
                    .entry((category.category_id.clone(), outcome.rule_id.clone()))
                    .or_default()
                    .push(outcome);
            }
        }
    }

    let mut site_outcomes: BTreeMap<String, Vec<RuleOutcome>> = BTreeMap::new();
    for ((category_id, _rule_id), outcomes) in by_rule {
        let mean = (outcomes.iter().map(|o| o.result.score as f64).sum::<f64>()
            / outcomes.len() as f64)
            .round() as u8;
        let worst = outcomes
            .iter()
            .map(|o| o.result.status)
            .fold(RuleStatus::Pass, RuleStatus::worst);
        let affected = outcomes
            .iter()
            .filter(|o| o.result.status != RuleStatus::Pass)
            .count();

        let template = outcomes[0];
        let message = if affected == 0 {
            template.result.message.clone()
        } else {
            format!("{} of {} pages affected", affected, outcomes.len())
        };

        site_outcomes.entry(category_id).or_default().push(RuleOutcome {
            rule_id: template.rule_id.clone(),
            rule_name: template.rule_name.clone(),
            category_id: template.category_id.clone(),
            weight: template.weight,
            result: RuleResult::new(worst, mean, message),
        });
    }

    site_outcomes
        .into_iter()
        .map(|(category_id, outcomes)| {
            let (name, weight) = category_meta
                .get(&category_id)
                .cloned()
                .unwrap_or_else(|| (category_id.clone(), 1));
            aggregate_category(&category_id, &name, weight, outcomes)
        })
        .collect()
}

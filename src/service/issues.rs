//! Post-hoc issue derivation: repeated rule failures/warnings across pages
//! are folded into one actionable item each, with the affected-page list and
//! a priority score. Runs after rule execution, never during it.

use std::collections::BTreeMap;

use crate::domain::models::{CategoryResult, IssueSeverity, NewIssue, RuleStatus};

const CRITICAL_FACTOR: i64 = 3;
const WARNING_FACTOR: i64 = 1;

/// Derive issues from per-page category results. One issue per rule that
/// failed or warned on at least one page; priority grows with severity,
/// rule weight and the number of affected pages.
pub fn generate_issues(per_page: &[(String, Vec<CategoryResult>)]) -> Vec<NewIssue> {
    struct Accumulator {
        category_id: String,
        rule_name: String,
        weight: u32,
        worst: RuleStatus,
        message: String,
        pages: Vec<String>,
    }

    // BTreeMap keeps issue output order stable across runs.
    let mut by_rule: BTreeMap<String, Accumulator> = BTreeMap::new();

    for (page_url, categories) in per_page {
        for category in categories {
            for outcome in &category.results {
                if outcome.result.status == RuleStatus::Pass {
                    continue;
                }
                let entry = by_rule
                    .entry(outcome.rule_id.clone())
                    .or_insert_with(|| Accumulator {
                        category_id: outcome.category_id.clone(),
                        rule_name: outcome.rule_name.clone(),
                        weight: outcome.weight,
                        worst: outcome.result.status,
                        message: outcome.result.message.clone(),
                        pages: Vec::new(),
                    });
                if outcome.result.status > entry.worst {
                    entry.worst = outcome.result.status;
                    entry.message = outcome.result.message.clone();
                }
                if !entry.pages.contains(page_url) {
                    entry.pages.push(page_url.clone());
                }
            }
        }
    }

    by_rule
        .into_iter()
        .map(|(rule_id, acc)| {
            let severity = if acc.worst == RuleStatus::Fail {
                IssueSeverity::Critical
            } else {
                IssueSeverity::Warning
            };
            let factor = match severity {
                IssueSeverity::Critical => CRITICAL_FACTOR,
                IssueSeverity::Warning => WARNING_FACTOR,
            };
            let priority = acc.pages.len() as i64 * acc.weight.max(1) as i64 * factor;

            NewIssue {
                rule_id,
                category_id: acc.category_id,
                severity,
                title: acc.rule_name,
                description: acc.message,
                affected_pages: acc.pages,
                priority,
            }
        })
        .collect()
}

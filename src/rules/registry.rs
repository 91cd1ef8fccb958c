//! In-memory index of all registered rules, grouped by category.
//!
//! Rules are registered once at process start. A duplicate rule id is a
//! boot-time programming error and aborts the process; it is not a
//! recoverable runtime condition. Registration order never affects scoring.

use std::collections::HashMap;
use std::sync::Arc;

use crate::rules::{CrossPageState, Rule};

/// A named, weighted grouping of rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub weight: u32,
}

impl Category {
    pub fn new(id: &str, name: &str, weight: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            weight,
        }
    }
}

#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<dyn Rule>>,
    by_id: HashMap<String, usize>,
    categories: HashMap<String, Category>,
    category_order: Vec<String>,
    state: Arc<CrossPageState>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category. Panics on a duplicate id: category definitions
    /// are wired up once at boot.
    pub fn register_category(&mut self, category: Category) {
        if self.categories.contains_key(&category.id) {
            panic!("duplicate category id registered: {}", category.id);
        }
        self.category_order.push(category.id.clone());
        self.categories.insert(category.id.clone(), category);
    }

    /// Register a rule. Panics on a duplicate id or an unknown category.
    pub fn register(&mut self, rule: Arc<dyn Rule>) {
        let id = rule.id().to_string();
        if self.by_id.contains_key(&id) {
            panic!("duplicate rule id registered: {id}");
        }
        if !self.categories.contains_key(rule.category()) {
            panic!("rule {id} references unknown category: {}", rule.category());
        }
        self.by_id.insert(id, self.rules.len());
        self.rules.push(rule);
    }

    pub fn rule_by_id(&self, id: &str) -> Option<Arc<dyn Rule>> {
        self.by_id.get(id).map(|&i| self.rules[i].clone())
    }

    /// Rules of one category, ordered by rule id so downstream iteration is
    /// deterministic regardless of registration order.
    pub fn rules_for_category(&self, category_id: &str) -> Vec<Arc<dyn Rule>> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .filter(|r| r.category() == category_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.id());
        rules
    }

    pub fn category(&self, category_id: &str) -> Option<&Category> {
        self.categories.get(category_id)
    }

    /// Category ids in registration order.
    pub fn category_ids(&self) -> Vec<String> {
        self.category_order.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Shared cross-page state handed to every audit context.
    pub fn state(&self) -> Arc<CrossPageState> {
        self.state.clone()
    }

    /// Clear cross-page accumulation. Must be called between logically
    /// distinct audits sharing a process, otherwise dedup rules leak
    /// observations across unrelated sites.
    pub fn reset_stateful_rules(&self) {
        self.state.reset();
    }

    /// Drop every rule and category. Used between independent test runs.
    pub fn clear(&mut self) {
        self.rules.clear();
        self.by_id.clear();
        self.categories.clear();
        self.category_order.clear();
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RuleResult;
    use crate::rules::AuditContext;
    use anyhow::Result;
    use async_trait::async_trait;

    struct DummyRule {
        id: &'static str,
    }

    #[async_trait]
    impl Rule for DummyRule {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            "Dummy"
        }
        fn category(&self) -> &'static str {
            "content"
        }
        async fn run(&self, _ctx: &AuditContext) -> Result<RuleResult> {
            Ok(RuleResult::pass(100, "ok"))
        }
    }

    fn registry_with_content() -> RuleRegistry {
        let mut r = RuleRegistry::new();
        r.register_category(Category::new("content", "Content", 3));
        r
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = registry_with_content();
        registry.register(Arc::new(DummyRule { id: "content.b" }));
        registry.register(Arc::new(DummyRule { id: "content.a" }));

        assert!(registry.rule_by_id("content.a").is_some());
        assert!(registry.rule_by_id("nope").is_none());

        // Deterministic id order regardless of registration order
        let ids: Vec<_> = registry
            .rules_for_category("content")
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(ids, vec!["content.a", "content.b"]);
    }

    #[test]
    #[should_panic(expected = "duplicate rule id")]
    fn test_duplicate_rule_id_is_fatal() {
        let mut registry = registry_with_content();
        registry.register(Arc::new(DummyRule { id: "content.dup" }));
        registry.register(Arc::new(DummyRule { id: "content.dup" }));
    }

    #[test]
    #[should_panic(expected = "unknown category")]
    fn test_unknown_category_is_fatal() {
        let mut registry = RuleRegistry::new();
        registry.register(Arc::new(DummyRule { id: "content.x" }));
    }

    #[test]
    fn test_clear_registry() {
        let mut registry = registry_with_content();
        registry.register(Arc::new(DummyRule { id: "content.a" }));
        registry.state().record("ns", "k", "url");

        registry.clear();
        assert_eq!(registry.rule_count(), 0);
        assert!(registry.category_ids().is_empty());
        assert!(registry.state().is_empty());
    }
}

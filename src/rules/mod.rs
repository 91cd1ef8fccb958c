//! Rule abstraction: a rule is a named, weighted check producing a
//! pass/warn/fail result against one page. Rule bodies are opaque to the
//! engine; identity, category and weight are data, `run` is the only
//! polymorphic surface.

mod context;
mod registry;

pub mod content;
pub mod links;
pub mod media;
pub mod technical;

pub use context::AuditContext;
pub use registry::{Category, RuleRegistry};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::models::RuleResult;

/// A single audit check. Implementations must be reentrant; any cross-page
/// accumulation goes through [`CrossPageState`], never module statics.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Stable identifier, unique across the registry (e.g. `content.title`).
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn category(&self) -> &'static str;

    /// Relative importance within the rule's category.
    fn weight(&self) -> u32 {
        1
    }

    async fn run(&self, ctx: &AuditContext) -> Result<RuleResult>;
}

/// Registry-scoped store for rules that accumulate state across pages
/// (duplicate-title detection and the like). Reset once per full audit so
/// unrelated audits sharing a process never leak observations.
#[derive(Debug, Default)]
pub struct CrossPageState {
    entries: DashMap<String, String>,
}

impl CrossPageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` under `namespace` as observed at `url`. Returns the URL
    /// of the first observation when the key was already present.
    pub fn record(&self, namespace: &str, key: &str, url: &str) -> Option<String> {
        let composite = format!("{namespace}\u{1f}{key}");
        match self.entries.entry(composite) {
            dashmap::mapref::entry::Entry::Occupied(e) => Some(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(url.to_string());
                None
            }
        }
    }

    pub fn reset(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Register the built-in categories and rules. Deployments extend the
/// registry with their own rules after calling this.
pub fn register_defaults(registry: &mut RuleRegistry) {
    registry.register_category(Category::new("content", "Content", 3));
    registry.register_category(Category::new("technical", "Technical", 2));
    registry.register_category(Category::new("links", "Links", 2));
    registry.register_category(Category::new("media", "Media", 1));

    content::register(registry);
    technical::register(registry);
    links::register(registry);
    media::register(registry);
}

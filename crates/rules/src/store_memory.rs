//! In-memory rule store for tests.

use std::sync::Mutex;

use {async_trait::async_trait, chrono::Utc, telefeed_channels::RuleFilters};

use crate::{
    Result,
    store::RuleStore,
    types::{NewRule, Rule, RuleDocument},
};

/// Rule store backed by a [`RuleDocument`] in memory. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryRuleStore {
    doc: Mutex<RuleDocument>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc(&self) -> std::sync::MutexGuard<'_, RuleDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn add(&self, owner: &str, rule: NewRule) -> Result<Rule> {
        self.doc().add(owner, rule, Utc::now())
    }

    async fn remove(&self, owner: &str, name: &str) -> Result<bool> {
        Ok(self.doc().remove(owner, name))
    }

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Rule>> {
        Ok(self.doc().get(owner, name).cloned())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Rule>> {
        Ok(self.doc().list(owner))
    }

    async fn list_all_active(&self) -> Result<Vec<Rule>> {
        Ok(self.doc().all().filter(|r| r.active).cloned().collect())
    }

    async fn set_active(&self, owner: &str, name: &str, active: bool) -> Result<Rule> {
        self.doc().update(owner, name, |r| r.active = active)
    }

    async fn update_filters(&self, owner: &str, name: &str, filters: RuleFilters) -> Result<Rule> {
        self.doc().update(owner, name, |r| r.filters = filters)
    }
}

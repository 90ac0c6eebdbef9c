//! Persistence trait for redirection rules.

use {async_trait::async_trait, telefeed_channels::RuleFilters};

use crate::{
    Result,
    types::{NewRule, Rule},
};

/// Durable (owner, rule name) to rule mapping.
///
/// Write operations surface persistence failures synchronously and leave the
/// store's view unchanged when they fail.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Persist a new active rule. Fails with `DuplicateRule` when the owner
    /// already has a rule with that name.
    async fn add(&self, owner: &str, rule: NewRule) -> Result<Rule>;

    /// Delete a rule. Returns whether it existed.
    async fn remove(&self, owner: &str, name: &str) -> Result<bool>;

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Rule>>;

    /// Every rule of `owner`, active or not.
    async fn list(&self, owner: &str) -> Result<Vec<Rule>>;

    /// Every active rule across all owners.
    async fn list_all_active(&self) -> Result<Vec<Rule>>;

    async fn set_active(&self, owner: &str, name: &str, active: bool) -> Result<Rule>;

    async fn update_filters(&self, owner: &str, name: &str, filters: RuleFilters) -> Result<Rule>;

    /// Active rules of `owner`, as a snapshot.
    async fn list_active(&self, owner: &str) -> Result<Vec<Rule>> {
        let rules = self.list(owner).await?;
        Ok(rules.into_iter().filter(|r| r.active).collect())
    }
}

//! Persistence trait for account session records.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    types::{AccountKey, SessionRecord},
};

/// Durable session credentials keyed by `"{owner}_{account}"`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &AccountKey) -> Result<Option<SessionRecord>>;

    /// Every record, active or not.
    async fn list(&self) -> Result<Vec<SessionRecord>>;

    /// Insert or replace the record for its key.
    async fn upsert(&self, record: SessionRecord) -> Result<()>;

    /// Returns `false` when no record exists.
    async fn set_active(&self, key: &AccountKey, active: bool) -> Result<bool>;

    async fn touch(&self, key: &AccountKey, at: DateTime<Utc>) -> Result<()>;

    async fn remove(&self, key: &AccountKey) -> Result<bool>;

    async fn list_active(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.list().await?.into_iter().filter(|r| r.active).collect())
    }
}

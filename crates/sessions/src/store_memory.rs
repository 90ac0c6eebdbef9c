//! In-memory session store for tests.

use std::{collections::BTreeMap, sync::Mutex};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    store::SessionStore,
    types::{AccountKey, SessionRecord},
};

#[derive(Default)]
pub struct InMemorySessionStore {
    records: Mutex<BTreeMap<AccountKey, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<AccountKey, SessionRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &AccountKey) -> Result<Option<SessionRecord>> {
        Ok(self.records().get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.records().values().cloned().collect())
    }

    async fn upsert(&self, record: SessionRecord) -> Result<()> {
        self.records().insert(record.key(), record);
        Ok(())
    }

    async fn set_active(&self, key: &AccountKey, active: bool) -> Result<bool> {
        Ok(self
            .records()
            .get_mut(key)
            .map(|r| r.active = active)
            .is_some())
    }

    async fn touch(&self, key: &AccountKey, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.records().get_mut(key) {
            record.last_used_at = at;
        }
        Ok(())
    }

    async fn remove(&self, key: &AccountKey) -> Result<bool> {
        Ok(self.records().remove(key).is_some())
    }
}

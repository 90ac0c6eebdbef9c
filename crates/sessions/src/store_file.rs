//! JSON file-backed session store.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    telefeed_common::fs::{atomic_write, read_optional},
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    store::SessionStore,
    types::{AccountKey, SessionRecord},
};

type Document = BTreeMap<String, SessionRecord>;

/// Session records in one JSON object keyed by `"{owner}_{account}"`.
pub struct FileSessionStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl FileSessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = read_optional(&path)
            .await
            .map_err(|e| Error::persistence(format!("read {}", path.display()), e))?;
        let doc = match raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<Document>(&raw)
                .map_err(|e| Error::persistence(format!("parse {}", path.display()), e))?,
            _ => Document::new(),
        };
        debug!(path = %path.display(), sessions = doc.len(), "loaded session records");
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn mutate<T>(&self, change: impl FnOnce(&mut Document) -> T) -> Result<T> {
        let mut guard = self.doc.lock().await;
        let mut next = guard.clone();
        let out = change(&mut next);
        let json = serde_json::to_string_pretty(&next)
            .map_err(|e| Error::persistence("serialize sessions", e))?;
        atomic_write(&self.path, json.as_bytes())
            .await
            .map_err(|e| Error::persistence(format!("write {}", self.path.display()), e))?;
        *guard = next;
        Ok(out)
    }

    fn find<'a>(doc: &'a Document, key: &AccountKey) -> Option<&'a SessionRecord> {
        doc.get(&key.to_string())
            .filter(|r| r.owner_id == key.owner && r.account_key == key.account)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &AccountKey) -> Result<Option<SessionRecord>> {
        let doc = self.doc.lock().await;
        Ok(Self::find(&doc, key).cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.doc.lock().await.values().cloned().collect())
    }

    async fn upsert(&self, record: SessionRecord) -> Result<()> {
        let id = record.key().to_string();
        self.mutate(|doc| {
            doc.insert(id, record);
        })
        .await
    }

    async fn set_active(&self, key: &AccountKey, active: bool) -> Result<bool> {
        let id = key.to_string();
        {
            let doc = self.doc.lock().await;
            match Self::find(&doc, key) {
                None => return Ok(false),
                Some(r) if r.active == active => return Ok(true),
                Some(_) => {},
            }
        }
        self.mutate(|doc| {
            doc.get_mut(&id).map(|r| r.active = active).is_some()
        })
        .await
    }

    async fn touch(&self, key: &AccountKey, at: DateTime<Utc>) -> Result<()> {
        let id = key.to_string();
        if Self::find(&*self.doc.lock().await, key).is_none() {
            warn!(key = %key, "touch on unknown session");
            return Ok(());
        }
        self.mutate(|doc| {
            if let Some(r) = doc.get_mut(&id) {
                r.last_used_at = at;
            }
        })
        .await
    }

    async fn remove(&self, key: &AccountKey) -> Result<bool> {
        let id = key.to_string();
        if Self::find(&*self.doc.lock().await, key).is_none() {
            return Ok(false);
        }
        self.mutate(|doc| doc.remove(&id).is_some()).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret, tempfile::TempDir};

    fn record(owner: &str, account: &str) -> SessionRecord {
        SessionRecord::new(&AccountKey::new(owner, account), Secret::new("tok".into()))
    }

    #[tokio::test]
    async fn persists_records_by_composite_key() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("telegram_sessions.json");
        let store = FileSessionStore::open(&path).await.unwrap();
        store.upsert(record("42", "+336")).await.unwrap();
        store.upsert(record("42", "bot")).await.unwrap();
        store
            .set_active(&AccountKey::new("42", "bot"), false)
            .await
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["42_+336"]["credentialHandle"], "tok");
        assert_eq!(raw["42_bot"]["active"], false);

        let reopened = FileSessionStore::open(&path).await.unwrap();
        let active = reopened.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].account_key, "+336");
    }

    #[tokio::test]
    async fn missing_keys_are_reported() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::open(tmp.path().join("s.json")).await.unwrap();
        let key = AccountKey::new("1", "a");
        assert!(!store.set_active(&key, false).await.unwrap());
        assert!(!store.remove(&key).await.unwrap());
        store.touch(&key, Utc::now()).await.unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
        assert!(!tmp.path().join("s.json").exists());
    }

    #[tokio::test]
    async fn touch_updates_last_used() {
        let tmp = TempDir::new().unwrap();
        let store = FileSessionStore::open(tmp.path().join("s.json")).await.unwrap();
        let key = AccountKey::new("1", "a");
        store.upsert(record("1", "a")).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);
        store.touch(&key, later).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap().unwrap().last_used_at, later);
    }
}

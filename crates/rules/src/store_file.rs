//! JSON file-backed rule store with atomic writes.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    chrono::Utc,
    telefeed_channels::RuleFilters,
    telefeed_common::fs::{atomic_write, read_optional},
    tokio::sync::Mutex,
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    store::RuleStore,
    types::{NewRule, Rule, RuleDocument},
};

/// Rule store persisting the whole document to one JSON file.
///
/// The document is cached in memory. Every mutation is applied to a copy,
/// written to disk, and only then swapped into the cache.
pub struct FileRuleStore {
    path: PathBuf,
    doc: Mutex<RuleDocument>,
}

impl FileRuleStore {
    /// Open the store at `path`, loading the document if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = load(&path).await?;
        info!(
            path = %path.display(),
            rules = doc.all().count(),
            "loaded redirection rules"
        );
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the document, persist it, then commit.
    async fn mutate<T>(&self, change: impl FnOnce(&mut RuleDocument) -> Result<T>) -> Result<T> {
        let mut guard = self.doc.lock().await;
        let mut next = guard.clone();
        let out = change(&mut next)?;
        write(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn load(path: &Path) -> Result<RuleDocument> {
    let raw = read_optional(path)
        .await
        .map_err(|e| Error::persistence(format!("read {}", path.display()), e))?;
    let Some(raw) = raw else {
        debug!(path = %path.display(), "no rule file yet");
        return Ok(RuleDocument::default());
    };
    RuleDocument::from_json(&raw)
        .map_err(|e| Error::persistence(format!("parse {}", path.display()), e))
}

async fn write(path: &Path, doc: &RuleDocument) -> Result<()> {
    let json = doc
        .to_json()
        .map_err(|e| Error::persistence(format!("serialize {}", path.display()), e))?;
    atomic_write(path, json.as_bytes())
        .await
        .map_err(|e| Error::persistence(format!("write {}", path.display()), e))
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn add(&self, owner: &str, rule: NewRule) -> Result<Rule> {
        let rule = self.mutate(|doc| doc.add(owner, rule, Utc::now())).await?;
        info!(owner, rule = %rule.name, source = %rule.source, destination = %rule.destination, "rule added");
        Ok(rule)
    }

    async fn remove(&self, owner: &str, name: &str) -> Result<bool> {
        if self.doc.lock().await.get(owner, name).is_none() {
            return Ok(false);
        }
        let removed = self.mutate(|doc| Ok(doc.remove(owner, name))).await?;
        if removed {
            info!(owner, rule = name, "rule removed");
        }
        Ok(removed)
    }

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Rule>> {
        Ok(self.doc.lock().await.get(owner, name).cloned())
    }

    async fn list(&self, owner: &str) -> Result<Vec<Rule>> {
        Ok(self.doc.lock().await.list(owner))
    }

    async fn list_all_active(&self) -> Result<Vec<Rule>> {
        let doc = self.doc.lock().await;
        Ok(doc.all().filter(|r| r.active).cloned().collect())
    }

    async fn set_active(&self, owner: &str, name: &str, active: bool) -> Result<Rule> {
        let rule = self
            .mutate(|doc| doc.update(owner, name, |r| r.active = active))
            .await?;
        info!(owner, rule = name, active, "rule activation changed");
        Ok(rule)
    }

    async fn update_filters(&self, owner: &str, name: &str, filters: RuleFilters) -> Result<Rule> {
        self.mutate(|doc| doc.update(owner, name, |r| r.filters = filters))
            .await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    #[tokio::test]
    async fn persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("redirections.json");

        let store = FileRuleStore::open(&path).await.unwrap();
        store
            .add(
                "u1",
                NewRule::new("from_channela", "acc", "-100123456", "987654")
                    .with_channel_name("channelA"),
            )
            .await
            .unwrap();
        store.add("u1", NewRule::new("off", "acc", "-1001", "2")).await.unwrap();
        store.set_active("u1", "off", false).await.unwrap();
        drop(store);

        let reopened = FileRuleStore::open(&path).await.unwrap();
        let rules = reopened.list("u1").await.unwrap();
        assert_eq!(rules.len(), 2);
        let active = reopened.list_active("u1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "from_channela");
        assert_eq!(active[0].owner, "u1");
        assert_eq!(active[0].channel_name, "channelA");
    }

    #[tokio::test]
    async fn keeps_backup_of_previous_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("redirections.json");
        let store = FileRuleStore::open(&path).await.unwrap();
        store.add("u1", NewRule::new("a", "acc", "-1001", "2")).await.unwrap();
        store.add("u1", NewRule::new("b", "acc", "-1003", "2")).await.unwrap();

        let bak = std::fs::read_to_string(path.with_extension("json.bak")).unwrap();
        let bak = RuleDocument::from_json(&bak).unwrap();
        assert_eq!(bak.list("u1").len(), 1);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_write_leaves_view_unchanged() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("data");
        let store = FileRuleStore::open(data_dir.join("redirections.json"))
            .await
            .unwrap();
        // A plain file where the data directory should be makes writes fail.
        std::fs::write(&data_dir, "not a directory").unwrap();

        let err = store
            .add("u1", NewRule::new("a", "acc", "-1001", "2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }));
        assert!(store.list("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_is_rejected_without_writing() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("redirections.json");
        let store = FileRuleStore::open(&path).await.unwrap();
        store.add("u1", NewRule::new("promo", "acc", "-1001", "2")).await.unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        assert!(matches!(
            store.add("u1", NewRule::new("promo", "acc", "-1003", "4")).await,
            Err(Error::DuplicateRule { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn corrupt_file_fails_to_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("redirections.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileRuleStore::open(&path).await,
            Err(Error::Persistence { .. })
        ));
    }
}

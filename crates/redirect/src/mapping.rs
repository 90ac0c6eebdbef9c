//! Source message to forwarded copy bookkeeping.

use std::{collections::HashMap, fmt, sync::Mutex};

use {
    async_trait::async_trait,
    telefeed_channels::{ConversationId, MessageId},
};

use crate::Result;

/// Identifies the copy of one source message in one destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey {
    pub source: ConversationId,
    pub source_message_id: MessageId,
    pub destination: ConversationId,
}

impl MappingKey {
    pub fn new(
        source: impl Into<ConversationId>,
        source_message_id: MessageId,
        destination: impl Into<ConversationId>,
    ) -> Self {
        Self {
            source: source.into(),
            source_message_id,
            destination: destination.into(),
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.source, self.source_message_id, self.destination
        )
    }
}

/// Message mapping table consulted on edits and deletions.
///
/// An entry is written after the first successful forward and removed only
/// once the destination copy is gone.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Insert or replace the destination message id for `key`.
    async fn insert(&self, key: &MappingKey, destination_message_id: MessageId) -> Result<()>;

    async fn get(&self, key: &MappingKey) -> Result<Option<MessageId>>;

    async fn remove(&self, key: &MappingKey) -> Result<bool>;

    async fn count(&self) -> Result<usize>;
}

/// Volatile mapping table. Lost on restart.
#[derive(Default)]
pub struct InMemoryMappingStore {
    entries: Mutex<HashMap<MappingKey, MessageId>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<MappingKey, MessageId>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn insert(&self, key: &MappingKey, destination_message_id: MessageId) -> Result<()> {
        self.entries().insert(key.clone(), destination_message_id);
        Ok(())
    }

    async fn get(&self, key: &MappingKey) -> Result<Option<MessageId>> {
        Ok(self.entries().get(key).copied())
    }

    async fn remove(&self, key: &MappingKey) -> Result<bool> {
        Ok(self.entries().remove(key).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries().len())
    }
}

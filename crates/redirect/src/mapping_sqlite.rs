//! SQLite-backed message mapping table using sqlx.

use {
    async_trait::async_trait,
    chrono::Utc,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    telefeed_channels::MessageId,
};

use crate::{
    Result,
    mapping::{MappingKey, MappingStore},
};

/// Mapping table that survives restarts, so edits to messages forwarded
/// before a restart keep propagating.
pub struct SqliteMappingStore {
    pool: SqlitePool,
}

impl SqliteMappingStore {
    /// Open its own pool on `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        crate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Use an existing pool. [`crate::run_migrations`] must have run.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn insert(&self, key: &MappingKey, destination_message_id: MessageId) -> Result<()> {
        sqlx::query(
            "INSERT INTO message_mappings
                (source_id, source_message_id, destination_id, destination_message_id, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_id, source_message_id, destination_id)
             DO UPDATE SET destination_message_id = excluded.destination_message_id",
        )
        .bind(key.source.as_str())
        .bind(key.source_message_id)
        .bind(key.destination.as_str())
        .bind(destination_message_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &MappingKey) -> Result<Option<MessageId>> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT destination_message_id FROM message_mappings
             WHERE source_id = ? AND source_message_id = ? AND destination_id = ?",
        )
        .bind(key.source.as_str())
        .bind(key.source_message_id)
        .bind(key.destination.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn remove(&self, key: &MappingKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM message_mappings
             WHERE source_id = ? AND source_message_id = ? AND destination_id = ?",
        )
        .bind(key.source.as_str())
        .bind(key.source_message_id)
        .bind(key.destination.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM message_mappings")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

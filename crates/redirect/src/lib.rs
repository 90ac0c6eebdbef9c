//! Rule-driven message redirection.
//!
//! The [`RedirectEngine`] attaches one worker per (account, source,
//! destination) of every active rule whose account session is authorized.
//! Workers copy new source messages to the destination, propagate edits and
//! deletions through the message mapping table, and retry transient platform
//! failures with backoff.

pub mod engine;
pub mod error;
pub mod mapping;
pub mod mapping_sqlite;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod router;
mod worker;

pub use {
    engine::{ReconcileReport, RedirectEngine, RegistrationInfo, rule_from_invite},
    error::{Error, ForwardErrorKind, Result},
    mapping::{InMemoryMappingStore, MappingKey, MappingStore},
    mapping_sqlite::SqliteMappingStore,
    router::RegistrationKey,
};

/// Run database migrations for the message mapping table.
///
/// Call this at startup before constructing a [`SqliteMappingStore`] on a
/// shared pool. Other migrations in the same database are left alone.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

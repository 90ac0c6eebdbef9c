//! Config schema types (storage, sessions, engine, telegram).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelefeedConfig {
    pub storage: StorageConfig,
    pub sessions: SessionsConfig,
    pub engine: EngineConfig,
    pub telegram: TelegramConfig,
}

/// Where the rule, session, and mapping stores live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for every persisted file. Defaults to the platform data
    /// dir (`~/.local/share/telefeed` on Linux).
    pub data_dir: Option<PathBuf>,
    /// Rule document, relative to `data_dir`.
    pub rules_file: String,
    /// Session document, relative to `data_dir`.
    pub sessions_file: String,
    /// Message mapping persistence.
    pub mapping_backend: MappingBackend,
    /// SQLite database for the `sqlite` mapping backend, relative to `data_dir`.
    pub mapping_database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            rules_file: "redirections.json".into(),
            sessions_file: "telegram_sessions.json".into(),
            mapping_backend: MappingBackend::default(),
            mapping_database: "telefeed.db".into(),
        }
    }
}

impl StorageConfig {
    /// Resolve the data directory, falling back to the platform default and
    /// then to the working directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "telefeed")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn rules_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.rules_file)
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.sessions_file)
    }

    pub fn mapping_database_path(&self) -> PathBuf {
        self.resolved_data_dir().join(&self.mapping_database)
    }
}

/// Backend for the source-to-destination message mapping table.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MappingBackend {
    /// Volatile table, lost on restart. Edits to messages forwarded before a
    /// restart stop propagating.
    Memory,
    /// SQLite table, reloaded on restart.
    #[default]
    Sqlite,
}

/// Account session pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Simultaneous reconnects during startup restoration.
    pub max_concurrent_restores: usize,
    /// Reconnect attempts after a transient disconnect before giving up.
    pub reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_initial_backoff_ms: u64,
    /// Upper bound for the reconnect delay.
    pub reconnect_max_backoff_ms: u64,
    /// Sessions unused for longer than this are deactivated at startup.
    /// `0` disables the sweep.
    pub idle_expiry_days: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_restores: 4,
            reconnect_attempts: 5,
            reconnect_initial_backoff_ms: 1_000,
            reconnect_max_backoff_ms: 60_000,
            idle_expiry_days: 7,
        }
    }
}

/// Redirection engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-registration queue depth. A full queue drops new events.
    pub queue_capacity: usize,
    /// Text sent when a forwarded message has neither text nor media.
    pub empty_placeholder: String,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            empty_placeholder: "📎 Message transféré".into(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff policy for transient forward failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

/// Telegram Bot API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Long-polling timeout passed to `getUpdates`, in seconds.
    pub poll_timeout_secs: u32,
    /// HTTP client timeout; must exceed the polling timeout.
    pub client_timeout_secs: u64,
    /// Delay before retrying a failed `getUpdates` call.
    pub poll_error_backoff_secs: u64,
    /// Bot API server, when not the public `api.telegram.org`.
    pub api_url: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            client_timeout_secs: 45,
            poll_error_backoff_secs: 5,
            api_url: None,
        }
    }
}

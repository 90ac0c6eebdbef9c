//! Wiring shared by every command: config, stores, connector and engine.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::Context,
    tracing::{info, warn},
};

use {
    telefeed_common::hooks::HookRegistry,
    telefeed_config::{MappingBackend, TelefeedConfig},
    telefeed_redirect::{InMemoryMappingStore, MappingStore, RedirectEngine, SqliteMappingStore},
    telefeed_rules::FileRuleStore,
    telefeed_sessions::{AccountKey, FileSessionStore, SessionPool, SessionStore},
    telefeed_telegram::{TelegramConnector, TelegramInviteResolver},
};

use crate::activity::ActivityLog;

pub struct App {
    pub config: TelefeedConfig,
    pub data_dir: PathBuf,
}

impl App {
    /// Load `config_path` (or discover one), then apply environment and
    /// command-line overrides.
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => telefeed_config::load_config(path)?,
            None => telefeed_config::discover_and_load(),
        };
        let mut config = telefeed_config::apply_env_overrides(config);
        if let Some(dir) = data_dir {
            config.storage.data_dir = Some(dir);
        }
        let data_dir = config.storage.resolved_data_dir();
        Ok(Self { config, data_dir })
    }

    pub async fn rules(&self) -> anyhow::Result<Arc<FileRuleStore>> {
        let store = FileRuleStore::open(self.config.storage.rules_path())
            .await
            .context("failed to open rule store")?;
        Ok(Arc::new(store))
    }

    pub async fn session_store(&self) -> anyhow::Result<Arc<FileSessionStore>> {
        let store = FileSessionStore::open(self.config.storage.sessions_path())
            .await
            .context("failed to open session store")?;
        Ok(Arc::new(store))
    }

    pub fn connector(&self) -> anyhow::Result<TelegramConnector> {
        let connector = TelegramConnector::new(self.config.telegram.clone());
        Ok(match self.config.telegram.api_url.as_deref() {
            Some(url) => {
                let url = reqwest::Url::parse(url)
                    .with_context(|| format!("invalid telegram api_url {url}"))?;
                connector.with_api_url(url)
            },
            None => connector,
        })
    }

    pub async fn session_pool(&self) -> anyhow::Result<Arc<SessionPool>> {
        Ok(Arc::new(SessionPool::new(
            Arc::new(self.connector()?),
            self.session_store().await?,
            self.config.sessions.clone(),
        )))
    }

    pub async fn mappings(&self) -> anyhow::Result<Arc<dyn MappingStore>> {
        let store: Arc<dyn MappingStore> = match self.config.storage.mapping_backend {
            MappingBackend::Memory => {
                warn!("message mappings are kept in memory and lost on restart");
                Arc::new(InMemoryMappingStore::new())
            },
            MappingBackend::Sqlite => {
                tokio::fs::create_dir_all(&self.data_dir)
                    .await
                    .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
                let db_path = self.config.storage.mapping_database_path();
                let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
                let store = SqliteMappingStore::connect(&db_url)
                    .await
                    .with_context(|| format!("failed to open {}", db_path.display()))?;
                Arc::new(store)
            },
        };
        Ok(store)
    }

    pub async fn engine(&self, hooks: HookRegistry) -> anyhow::Result<Arc<RedirectEngine>> {
        let engine = RedirectEngine::new(
            self.rules().await?,
            self.session_pool().await?,
            self.mappings().await?,
            self.config.engine.clone(),
        )
        .with_hooks(Arc::new(hooks));
        Ok(Arc::new(engine))
    }

    /// Invite resolver backed by the stored bot token of `owner`/`account`.
    pub async fn resolver(
        &self,
        owner: &str,
        account: &str,
    ) -> anyhow::Result<TelegramInviteResolver> {
        let key = AccountKey::new(owner, account);
        let record = self
            .session_store()
            .await?
            .load(&key)
            .await?
            .with_context(|| {
                format!("no session stored for {key}; run `telefeed sessions add` first")
            })?;
        let bot = self.connector()?.bot(&record.credential_handle)?;
        Ok(TelegramInviteResolver::new(bot))
    }
}

/// Start the engine and forward until Ctrl-C.
pub async fn run(app: App, activity_log: bool) -> anyhow::Result<()> {
    let mut hooks = HookRegistry::new();
    if activity_log {
        let path = app.data_dir.join("activity.jsonl");
        info!(path = %path.display(), "writing forwarding activity log");
        hooks.register(Arc::new(ActivityLog::new(path)));
    }

    let engine = app.engine(hooks).await?;
    let report = engine.start().await?;
    info!(
        registrations = report.registrations,
        data_dir = %app.data_dir.display(),
        "forwarding; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");
    engine.shutdown().await;
    Ok(())
}

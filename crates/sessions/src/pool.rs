//! Live account sessions keyed by (owner, account).

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chrono::Utc,
    futures::{StreamExt, stream},
    secrecy::Secret,
    telefeed_channels::{AccountConnection, ConnectionEvent, Connector},
    telefeed_common::Backoff,
    telefeed_config::SessionsConfig,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    store::SessionStore,
    types::{AccountKey, SessionInfo, SessionRecord, SessionStatus},
};

/// An authorized connection owned by the pool.
///
/// The event stream can be taken once, by the engine's router for this
/// account. A reconnect produces a new handle with a higher generation.
pub struct SessionHandle {
    key: AccountKey,
    generation: u64,
    connection: Arc<dyn AccountConnection>,
    events: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    display_name: Option<String>,
}

impl SessionHandle {
    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn connection(&self) -> Arc<dyn AccountConnection> {
        Arc::clone(&self.connection)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Take the inbound event stream. Returns `None` once taken.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct SessionEntry {
    status: SessionStatus,
    handle: Option<Arc<SessionHandle>>,
}

/// Owns exactly one live session per account key.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    store: Arc<dyn SessionStore>,
    config: SessionsConfig,
    sessions: RwLock<HashMap<AccountKey, SessionEntry>>,
    /// Serializes connect attempts per key so concurrent callers share one.
    connect_guards: Mutex<HashMap<AccountKey, Arc<tokio::sync::Mutex<()>>>>,
    generation: AtomicU64,
}

impl SessionPool {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
        config: SessionsConfig,
    ) -> Self {
        Self {
            connector,
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
            connect_guards: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SessionsConfig {
        &self.config
    }

    /// Current in-memory status. Unknown keys are `Disconnected`.
    pub fn status(&self, key: &AccountKey) -> SessionStatus {
        self.read_sessions()
            .get(key)
            .map(|e| e.status)
            .unwrap_or_default()
    }

    /// Live handle if the session is authorized.
    pub fn live(&self, key: &AccountKey) -> Option<Arc<SessionHandle>> {
        self.read_sessions()
            .get(key)
            .filter(|e| e.status == SessionStatus::Authorized)
            .and_then(|e| e.handle.clone())
    }

    /// Every authorized session's handle.
    pub fn live_handles(&self) -> Vec<Arc<SessionHandle>> {
        self.read_sessions()
            .values()
            .filter(|e| e.status == SessionStatus::Authorized)
            .filter_map(|e| e.handle.clone())
            .collect()
    }

    /// Return the authorized session for `key`, connecting from the stored
    /// credential when needed.
    ///
    /// Fails with `SessionUnavailable` when the record is missing or
    /// inactive, or the platform refuses it. A refused credential marks the
    /// session `Expired` and the record inactive.
    pub async fn get_or_create(&self, key: &AccountKey) -> Result<Arc<SessionHandle>> {
        if let Some(handle) = self.live(key) {
            return Ok(handle);
        }

        let guard = self.connect_guard(key);
        let _connecting = guard.lock().await;

        // Another caller may have connected while we waited.
        if let Some(handle) = self.live(key) {
            return Ok(handle);
        }

        let record = match self.store.load(key).await? {
            Some(record) if record.active => record,
            Some(_) => {
                self.set_status(key, SessionStatus::Expired, None);
                return Err(Error::unavailable(key, "session is inactive"));
            },
            None => return Err(Error::unavailable(key, "no stored session")),
        };

        self.set_status(key, SessionStatus::Connecting, None);
        debug!(%key, "connecting account session");

        match self
            .connector
            .connect(&key.account, &record.credential_handle)
            .await
        {
            Ok(connected) => {
                let handle = Arc::new(SessionHandle {
                    key: key.clone(),
                    generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
                    connection: connected.connection,
                    events: Mutex::new(Some(connected.events)),
                    display_name: connected.display_name,
                });
                self.set_status(key, SessionStatus::Authorized, Some(Arc::clone(&handle)));
                if let Err(e) = self.store.touch(key, Utc::now()).await {
                    warn!(%key, error = %e, "failed to record session use");
                }
                info!(
                    %key,
                    platform = self.connector.platform(),
                    account_name = ?handle.display_name,
                    "account session authorized"
                );
                Ok(handle)
            },
            Err(telefeed_channels::Error::Unauthorized { message }) => {
                warn!(%key, reason = %message, "account session no longer authorized");
                self.expire(key).await;
                Err(Error::unavailable(key, message))
            },
            Err(e) => {
                warn!(%key, error = %e, "account session connect failed");
                self.set_status(key, SessionStatus::Disconnected, None);
                Err(Error::unavailable(key, e))
            },
        }
    }

    /// Reconnect every persisted active session, at most
    /// `max_concurrent_restores` at a time. Returns how many are authorized.
    pub async fn restore_all(&self) -> Result<usize> {
        let records = self.store.list_active().await?;
        let total = records.len();
        let limit = self.config.max_concurrent_restores.max(1);

        let restored = stream::iter(records)
            .map(|record| {
                let key = record.key();
                async move { self.get_or_create(&key).await.is_ok() }
            })
            .buffer_unordered(limit)
            .filter(|ok| std::future::ready(*ok))
            .count()
            .await;

        info!(restored, total, "account sessions restored");
        Ok(restored)
    }

    /// Store a freshly verified credential and make the account usable.
    /// An existing live session for the key is closed first.
    pub async fn register(&self, key: &AccountKey, credential: Secret<String>) -> Result<()> {
        let mut record = SessionRecord::new(key, credential);
        if let Some(previous) = self.store.load(key).await? {
            record.created_at = previous.created_at;
        }
        self.store.upsert(record).await?;

        let previous = self.write_sessions().remove(key);
        if let Some(handle) = previous.and_then(|e| e.handle) {
            handle.connection.disconnect().await;
        }
        info!(%key, "account session registered");
        Ok(())
    }

    /// Persist the record as inactive, then mark the session `Expired` and
    /// disconnect it. A failed write leaves the live session untouched.
    pub async fn deactivate(&self, key: &AccountKey) -> Result<()> {
        if !self.store.set_active(key, false).await? {
            return Err(Error::not_found(key));
        }
        let handle = {
            let mut sessions = self.write_sessions();
            let entry = sessions.entry(key.clone()).or_default();
            entry.status = SessionStatus::Expired;
            entry.handle.take()
        };
        if let Some(handle) = handle {
            handle.connection.disconnect().await;
        }
        info!(%key, "account session deactivated");
        Ok(())
    }

    /// Record that the connection behind `generation` dropped for a network
    /// reason. Stale generations are ignored. Returns whether the live
    /// session was the one that dropped.
    pub fn mark_disconnected(&self, key: &AccountKey, generation: u64) -> bool {
        let mut sessions = self.write_sessions();
        let Some(entry) = sessions.get_mut(key) else {
            return false;
        };
        if entry.handle.as_ref().map(|h| h.generation) != Some(generation) {
            return false;
        }
        entry.handle = None;
        entry.status = SessionStatus::Disconnected;
        true
    }

    /// Record that the platform revoked the connection behind `generation`.
    pub async fn mark_expired(&self, key: &AccountKey, generation: u64) -> bool {
        let current = self
            .read_sessions()
            .get(key)
            .and_then(|e| e.handle.as_ref())
            .is_some_and(|h| h.generation == generation);
        if current {
            self.expire(key).await;
        }
        current
    }

    /// Reconnect a dropped session with exponential backoff. Stops early when
    /// the session turns `Expired`.
    pub async fn reconnect(&self, key: &AccountKey) -> Result<Arc<SessionHandle>> {
        let backoff = Backoff::from_millis(
            self.config.reconnect_initial_backoff_ms,
            self.config.reconnect_max_backoff_ms,
        );
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match self.get_or_create(key).await {
                Ok(handle) => {
                    info!(%key, attempt, "account session reconnected");
                    return Ok(handle);
                },
                Err(e) => {
                    if self.status(key) == SessionStatus::Expired {
                        return Err(e);
                    }
                    last_error = Some(e);
                },
            }
            if attempt + 1 < attempts {
                let delay = backoff.delay(attempt);
                debug!(%key, attempt, delay_ms = delay.as_millis() as u64, "retrying reconnect");
                tokio::time::sleep(delay).await;
            }
        }

        warn!(%key, attempts, "giving up reconnecting account session");
        Err(last_error.unwrap_or_else(|| Error::unavailable(key, "reconnect attempts exhausted")))
    }

    /// Deactivate active records unused for longer than `max_idle`.
    /// Returns the keys that were deactivated.
    pub async fn cleanup_stale(&self, max_idle: Duration) -> Result<Vec<AccountKey>> {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return Ok(Vec::new());
        };
        let cutoff = Utc::now() - max_idle;
        let stale: Vec<AccountKey> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|r| r.last_used_at < cutoff)
            .map(|r| r.key())
            .collect();

        for key in &stale {
            info!(%key, "deactivating idle account session");
            self.deactivate(key).await?;
        }
        Ok(stale)
    }

    /// Record activity on the session.
    pub async fn touch(&self, key: &AccountKey) -> Result<()> {
        self.store.touch(key, Utc::now()).await
    }

    /// Sessions stored for `owner` with their live status.
    pub async fn list(&self, owner: &str) -> Result<Vec<SessionInfo>> {
        let records = self.store.list().await?;
        let sessions = self.read_sessions();
        Ok(records
            .into_iter()
            .filter(|r| r.owner_id == owner)
            .map(|r| {
                let key = r.key();
                let entry = sessions.get(&key);
                let status = match entry {
                    Some(e) => e.status,
                    None if !r.active => SessionStatus::Expired,
                    None => SessionStatus::Disconnected,
                };
                SessionInfo {
                    display_name: entry
                        .and_then(|e| e.handle.as_ref())
                        .and_then(|h| h.display_name.clone()),
                    key,
                    status,
                    active: r.active,
                    last_used_at: r.last_used_at,
                }
            })
            .collect())
    }

    /// Close every live connection. Records stay active for the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<SessionHandle>> = {
            let mut sessions = self.write_sessions();
            sessions
                .drain()
                .filter_map(|(_, entry)| entry.handle)
                .collect()
        };
        for handle in handles {
            handle.connection.disconnect().await;
        }
    }

    /// Drop a session the platform refused. It only turns `Expired` once the
    /// record is stored inactive; otherwise it is left `Disconnected` so the
    /// next connect attempt runs into the refusal again.
    async fn expire(&self, key: &AccountKey) {
        let status = match self.store.set_active(key, false).await {
            Ok(_) => SessionStatus::Expired,
            Err(e) => {
                warn!(%key, error = %e, "failed to persist expired session");
                SessionStatus::Disconnected
            },
        };
        let handle = {
            let mut sessions = self.write_sessions();
            let entry = sessions.entry(key.clone()).or_default();
            entry.status = status;
            entry.handle.take()
        };
        if let Some(handle) = handle {
            handle.connection.disconnect().await;
        }
    }

    fn set_status(&self, key: &AccountKey, status: SessionStatus, handle: Option<Arc<SessionHandle>>) {
        let mut sessions = self.write_sessions();
        let entry = sessions.entry(key.clone()).or_default();
        entry.status = status;
        entry.handle = handle;
    }

    fn connect_guard(&self, key: &AccountKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self
            .connect_guards
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Arc::clone(guards.entry(key.clone()).or_default())
    }

    fn read_sessions(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<AccountKey, SessionEntry>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_sessions(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<AccountKey, SessionEntry>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

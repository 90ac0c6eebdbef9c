//! Redirection engine: keeps registrations consistent with active rules and
//! authorized sessions.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex as StdMutex, RwLock},
};

use {
    secrecy::Secret,
    telefeed_channels::{
        CloseReason, ConversationId, FilterProvider, InviteResolver, KeywordFilterProvider,
        RuleFilters,
    },
    telefeed_common::hooks::{HookPayload, HookRegistry},
    telefeed_config::EngineConfig,
    telefeed_rules::{NewRule, Rule, RuleStore},
    telefeed_sessions::{AccountKey, SessionHandle, SessionInfo, SessionPool},
    tokio::{
        sync::{Mutex, mpsc},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::metrics::{gauge, names};
use crate::{
    Error, Result,
    mapping::MappingStore,
    router::{RegistrationKey, Router, RouterExit},
    worker::{RetryPolicy, SharedChain, Worker},
};

/// Snapshot of one attached registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub key: RegistrationKey,
    pub rule: String,
    pub generation: u64,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub attached: usize,
    pub detached: usize,
    pub registrations: usize,
}

/// Resolve `link` into a rule named after the conversation title, reading
/// from the channel form of the resolved id.
pub async fn rule_from_invite(
    resolver: &dyn InviteResolver,
    account: &str,
    link: &str,
    destination: impl Into<ConversationId>,
    filters: RuleFilters,
) -> Result<NewRule> {
    let resolved = resolver.resolve(link).await?;
    let source = match resolved.id.as_i64() {
        Ok(id) => ConversationId::from_channel_id(id),
        Err(_) => resolved.id.clone(),
    };
    Ok(NewRule::new(resolved.rule_name(), account, source, destination)
        .with_channel_name(resolved.title)
        .with_filters(filters))
}

struct Registration {
    rule: String,
    generation: u64,
    filters: RuleFilters,
    chain: SharedChain,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct EngineState {
    registrations: HashMap<RegistrationKey, Registration>,
    routers: HashMap<AccountKey, Router>,
}

/// Attaches one worker per (account, source, destination) of every active
/// rule whose session is authorized, and detaches the rest.
pub struct RedirectEngine {
    rules: Arc<dyn RuleStore>,
    sessions: Arc<SessionPool>,
    mappings: Arc<dyn MappingStore>,
    filters: Arc<dyn FilterProvider>,
    resolver: Option<Arc<dyn InviteResolver>>,
    hooks: Arc<HookRegistry>,
    config: EngineConfig,
    /// Reconcile lock; every attach and detach happens under it.
    state: Mutex<EngineState>,
    cancel: CancellationToken,
    exits_tx: mpsc::UnboundedSender<RouterExit>,
    exits_rx: StdMutex<Option<mpsc::UnboundedReceiver<RouterExit>>>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl RedirectEngine {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        sessions: Arc<SessionPool>,
        mappings: Arc<dyn MappingStore>,
        config: EngineConfig,
    ) -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            rules,
            sessions,
            mappings,
            filters: Arc::new(KeywordFilterProvider),
            resolver: None,
            hooks: Arc::new(HookRegistry::new()),
            config,
            state: Mutex::new(EngineState::default()),
            cancel: CancellationToken::new(),
            exits_tx,
            exits_rx: StdMutex::new(Some(exits_rx)),
            supervisor: StdMutex::new(None),
        }
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Arc<dyn FilterProvider>) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn InviteResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionPool> {
        &self.sessions
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Sweep idle sessions, restore the rest, start watching router exits and
    /// attach registrations.
    pub async fn start(self: &Arc<Self>) -> Result<ReconcileReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShutDown);
        }

        let idle_days = self.sessions.config().idle_expiry_days;
        if idle_days > 0 {
            let max_idle = std::time::Duration::from_secs(u64::from(idle_days) * 86_400);
            let expired = self.sessions.cleanup_stale(max_idle).await?;
            if !expired.is_empty() {
                info!(count = expired.len(), "deactivated idle account sessions");
            }
        }

        self.sessions.restore_all().await?;
        self.spawn_supervisor();
        let report = self.reconcile().await?;
        info!(
            registrations = report.registrations,
            "redirect engine started"
        );
        Ok(report)
    }

    /// Cancel every worker and router, then close all sessions.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = supervisor {
            let _ = task.await;
        }

        let (registrations, routers) = {
            let mut state = self.state.lock().await;
            (
                state.registrations.drain().collect::<Vec<_>>(),
                state.routers.drain().collect::<Vec<_>>(),
            )
        };
        for (_, registration) in registrations {
            registration.cancel.cancel();
            let _ = registration.task.await;
        }
        for (_, router) in routers {
            router.stop().await;
        }
        #[cfg(feature = "metrics")]
        gauge!(names::REGISTRATIONS).set(0.0);

        self.sessions.shutdown().await;
        info!("redirect engine stopped");
    }

    fn spawn_supervisor(self: &Arc<Self>) {
        let Some(mut exits) = self
            .exits_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let engine = Arc::clone(self);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                let exit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    exit = exits.recv() => match exit {
                        Some(exit) => exit,
                        None => break,
                    },
                };
                engine.on_router_exit(exit).await;
            }
        });
        *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    async fn on_router_exit(self: &Arc<Self>, exit: RouterExit) {
        let RouterExit {
            account,
            generation,
            reason,
        } = exit;
        match reason {
            CloseReason::Unauthorized(reason) => {
                if self.sessions.mark_expired(&account, generation).await {
                    warn!(%account, %reason, "account session revoked by platform");
                    self.hooks
                        .dispatch(&HookPayload::SessionExpired {
                            owner_id: account.owner.clone(),
                            account: account.account.clone(),
                            reason,
                        })
                        .await;
                }
                self.reconcile_logged().await;
            },
            CloseReason::Network(reason) => {
                if !self.sessions.mark_disconnected(&account, generation) {
                    return;
                }
                warn!(%account, %reason, "account connection lost, reconnecting");
                let engine = Arc::clone(self);
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {},
                        result = engine.sessions.reconnect(&account) => {
                            if let Err(e) = result {
                                warn!(%account, error = %e, "account session stays offline");
                            }
                            engine.reconcile_logged().await;
                        },
                    }
                });
            },
            CloseReason::Shutdown => {},
        }
    }

    // ── Reconciliation ──────────────────────────────────────────────────────

    /// Diff registrations against active rules with authorized sessions.
    /// Safe to call at any time; a second pass with no changes is a no-op.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShutDown);
        }
        // Connects happen before the lock; an unreachable account must not
        // stall other reconciles.
        self.connect_rule_accounts().await?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let rules = self.rules.list_all_active().await?;
        let live: HashMap<AccountKey, Arc<SessionHandle>> = self
            .sessions
            .live_handles()
            .into_iter()
            .map(|handle| (handle.key().clone(), handle))
            .collect();

        let mut target: HashMap<RegistrationKey, (Rule, Arc<SessionHandle>)> = HashMap::new();
        for rule in rules {
            let account = AccountKey::new(&rule.owner, &rule.account);
            let Some(handle) = live.get(&account) else {
                continue;
            };
            let key = RegistrationKey {
                account,
                source: rule.source.clone(),
                destination: rule.destination.clone(),
            };
            match target.entry(key) {
                Entry::Occupied(kept) => {
                    warn!(
                        registration = %kept.key(),
                        rule = %rule.name,
                        kept = %kept.get().0.name,
                        "duplicate redirection ignored"
                    );
                },
                Entry::Vacant(slot) => {
                    slot.insert((rule, Arc::clone(handle)));
                },
            }
        }

        let mut report = ReconcileReport::default();

        let stale: Vec<RegistrationKey> = state
            .registrations
            .iter()
            .filter(|(key, reg)| {
                target.get(*key).is_none_or(|(rule, handle)| {
                    handle.generation() != reg.generation || rule.name != reg.rule
                })
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(reg) = state.registrations.remove(&key) {
                if let Some(router) = state.routers.get(&key.account) {
                    router.remove_route(&key);
                }
                reg.cancel.cancel();
                info!(registration = %key, rule = %reg.rule, "registration detached");
                report.detached += 1;
            }
        }

        let dead_routers: Vec<AccountKey> = state
            .routers
            .iter()
            .filter(|(account, router)| {
                self.sessions
                    .live(account)
                    .is_none_or(|h| h.generation() != router.generation())
            })
            .map(|(account, _)| account.clone())
            .collect();
        for account in dead_routers {
            if let Some(router) = state.routers.remove(&account) {
                router.stop().await;
                debug!(%account, "router stopped");
            }
        }

        // Every authorized session gets a router, with or without rules, so
        // nothing posted before a rule exists is left queued for it.
        for handle in live.values() {
            let account = handle.key();
            if state.routers.contains_key(account) {
                continue;
            }
            let Some(events) = handle.take_events() else {
                warn!(%account, generation = handle.generation(), "session event stream already taken");
                continue;
            };
            let router = Router::spawn(
                account.clone(),
                handle.generation(),
                events,
                self.cancel.child_token(),
                self.exits_tx.clone(),
            );
            state.routers.insert(account.clone(), router);
        }

        for (key, (rule, handle)) in target {
            if let Some(reg) = state.registrations.get_mut(&key) {
                if reg.filters != rule.filters {
                    let chain = self.filters.chain_for(&rule.filters);
                    *reg.chain.write().unwrap_or_else(|e| e.into_inner()) = chain;
                    reg.filters = rule.filters;
                    debug!(registration = %key, rule = %reg.rule, "filters refreshed");
                }
                continue;
            }
            let Some(router) = state.routers.get(&key.account) else {
                continue;
            };

            let registration = self.attach(&key, &rule, &handle, router);
            info!(
                registration = %key,
                rule = %rule.name,
                generation = registration.generation,
                "registration attached"
            );
            state.registrations.insert(key, registration);
            report.attached += 1;
        }

        report.registrations = state.registrations.len();
        #[cfg(feature = "metrics")]
        gauge!(names::REGISTRATIONS).set(report.registrations as f64);
        if report.attached > 0 || report.detached > 0 {
            info!(
                attached = report.attached,
                detached = report.detached,
                registrations = report.registrations,
                "registrations reconciled"
            );
        }
        Ok(report)
    }

    async fn connect_rule_accounts(&self) -> Result<()> {
        let mut accounts: Vec<AccountKey> = self
            .rules
            .list_all_active()
            .await?
            .iter()
            .map(|rule| AccountKey::new(&rule.owner, &rule.account))
            .collect();
        accounts.sort();
        accounts.dedup();

        let connects = accounts.iter().map(|account| async move {
            if let Err(e) = self.sessions.get_or_create(account).await {
                debug!(%account, error = %e, "rules dormant until the session is available");
            }
        });
        futures::future::join_all(connects).await;
        Ok(())
    }

    fn attach(
        &self,
        key: &RegistrationKey,
        rule: &Rule,
        handle: &SessionHandle,
        router: &Router,
    ) -> Registration {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let chain: SharedChain = Arc::new(RwLock::new(self.filters.chain_for(&rule.filters)));
        let cancel = self.cancel.child_token();
        let worker = Worker {
            key: key.clone(),
            rule: rule.name.clone(),
            connection: handle.connection(),
            chain: Arc::clone(&chain),
            mappings: Arc::clone(&self.mappings),
            hooks: Arc::clone(&self.hooks),
            sessions: Arc::clone(&self.sessions),
            placeholder: self.config.empty_placeholder.clone(),
            retry: RetryPolicy::from(&self.config.retry),
            cancel: cancel.clone(),
            last_touch: None,
        };
        let task = tokio::spawn(worker.run(rx));
        router.add_route(key, &rule.name, tx);
        Registration {
            rule: rule.name.clone(),
            generation: handle.generation(),
            filters: rule.filters.clone(),
            chain,
            cancel,
            task,
        }
    }

    async fn reconcile_logged(&self) {
        match self.reconcile().await {
            Ok(_) => {},
            Err(Error::ShutDown) => {},
            Err(e) => warn!(error = %e, "reconciliation failed"),
        }
    }

    /// Attached registrations, ordered by key.
    pub async fn registrations(&self) -> Vec<RegistrationInfo> {
        let state = self.state.lock().await;
        let mut out: Vec<RegistrationInfo> = state
            .registrations
            .iter()
            .map(|(key, reg)| RegistrationInfo {
                key: key.clone(),
                rule: reg.rule.clone(),
                generation: reg.generation,
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    // ── Rules ───────────────────────────────────────────────────────────────

    pub async fn create_rule(&self, owner: &str, rule: NewRule) -> Result<Rule> {
        let rule = self.rules.add(owner, rule).await?;
        self.reconcile_logged().await;
        Ok(rule)
    }

    /// Resolve `link` and create a rule named after the conversation title.
    pub async fn create_rule_from_invite(
        &self,
        owner: &str,
        account: &str,
        link: &str,
        destination: impl Into<ConversationId>,
        filters: RuleFilters,
    ) -> Result<Rule> {
        let resolver = self.resolver.as_ref().ok_or(Error::ResolverUnavailable)?;
        let rule = rule_from_invite(resolver.as_ref(), account, link, destination, filters).await?;
        debug!(owner, link, rule = %rule.name, "invite resolved");
        self.create_rule(owner, rule).await
    }

    /// Delete a rule. Returns whether it existed.
    pub async fn remove_rule(&self, owner: &str, name: &str) -> Result<bool> {
        let removed = self.rules.remove(owner, name).await?;
        if removed {
            self.reconcile_logged().await;
        }
        Ok(removed)
    }

    pub async fn list_rules(&self, owner: &str) -> Result<Vec<Rule>> {
        Ok(self.rules.list(owner).await?)
    }

    pub async fn set_rule_active(&self, owner: &str, name: &str, active: bool) -> Result<Rule> {
        let rule = self.rules.set_active(owner, name, active).await?;
        self.reconcile_logged().await;
        Ok(rule)
    }

    pub async fn update_rule_filters(
        &self,
        owner: &str,
        name: &str,
        filters: RuleFilters,
    ) -> Result<Rule> {
        let rule = self.rules.update_filters(owner, name, filters).await?;
        self.reconcile_logged().await;
        Ok(rule)
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    /// Reconnect every persisted active session and reconcile.
    pub async fn restore_all(&self) -> Result<usize> {
        let restored = self.sessions.restore_all().await?;
        self.reconcile().await?;
        Ok(restored)
    }

    /// Persist a verified credential and attach the account's rules.
    pub async fn register_session(
        &self,
        owner: &str,
        account: &str,
        credential: Secret<String>,
    ) -> Result<()> {
        self.sessions
            .register(&AccountKey::new(owner, account), credential)
            .await?;
        self.reconcile_logged().await;
        Ok(())
    }

    /// Deactivate the account session and detach every registration bound
    /// to it. The rules themselves are kept.
    pub async fn logout(&self, owner: &str, account: &str) -> Result<()> {
        let key = AccountKey::new(owner, account);
        let deactivated = self.sessions.deactivate(&key).await;
        self.reconcile_logged().await;
        deactivated?;
        info!(account = %key, "account logged out");
        Ok(())
    }

    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionInfo>> {
        Ok(self.sessions.list(owner).await?)
    }
}

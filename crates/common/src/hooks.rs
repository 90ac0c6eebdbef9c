//! Post-forward hook types shared across crates.
//!
//! The redirection engine emits a [`HookPayload`] after every forward, edit,
//! delete, or failed attempt. Analyzers (for example a pattern predictor that
//! watches a mirrored channel) subscribe through [`HookHandler`] without the
//! engine knowing about them. All events are informational: handlers cannot
//! block or rewrite a forward, and a failing handler never affects delivery.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::Result;

// ── HookEvent ───────────────────────────────────────────────────────────────

/// Events that hooks can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    MessageForwarded,
    MessageEdited,
    MessageDeleted,
    ForwardFailed,
    SessionExpired,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

// ── HookPayload ─────────────────────────────────────────────────────────────

/// Typed payload carried with each hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HookPayload {
    MessageForwarded {
        owner_id: String,
        rule: String,
        source_id: String,
        source_message_id: i64,
        destination_id: String,
        destination_message_id: i64,
        text: Option<String>,
    },
    MessageEdited {
        owner_id: String,
        rule: String,
        destination_id: String,
        destination_message_id: i64,
        text: String,
    },
    MessageDeleted {
        owner_id: String,
        rule: String,
        destination_id: String,
        destination_message_id: i64,
    },
    ForwardFailed {
        owner_id: String,
        rule: String,
        destination_id: String,
        error: String,
    },
    SessionExpired {
        owner_id: String,
        account: String,
        reason: String,
    },
}

impl HookPayload {
    /// Returns the [`HookEvent`] variant that matches this payload.
    pub fn event(&self) -> HookEvent {
        match self {
            Self::MessageForwarded { .. } => HookEvent::MessageForwarded,
            Self::MessageEdited { .. } => HookEvent::MessageEdited,
            Self::MessageDeleted { .. } => HookEvent::MessageDeleted,
            Self::ForwardFailed { .. } => HookEvent::ForwardFailed,
            Self::SessionExpired { .. } => HookEvent::SessionExpired,
        }
    }
}

// ── HookHandler trait ───────────────────────────────────────────────────────

/// Implemented by anything that wants to observe forwarding activity.
#[async_trait]
pub trait HookHandler: Send + Sync {
    /// A human-readable name for this handler.
    fn name(&self) -> &str;

    /// Which events this handler subscribes to.
    fn events(&self) -> &[HookEvent];

    async fn handle(&self, event: HookEvent, payload: &HookPayload) -> Result<()>;
}

// ── Handler health ──────────────────────────────────────────────────────────

/// Call counters for one handler, shared by every event it subscribes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerHealth {
    pub calls: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    /// Set while the handler is skipped after repeated failures.
    pub tripped_at: Option<Instant>,
}

impl HandlerHealth {
    pub fn is_tripped(&self) -> bool {
        self.tripped_at.is_some()
    }
}

/// `threshold` consecutive failures skip a handler for `cooldown`.
#[derive(Debug, Clone, Copy)]
struct Breaker {
    threshold: u64,
    cooldown: Duration,
}

impl Breaker {
    /// Whether the handler may run now, tripping or resetting it on the way.
    fn admit(&self, name: &str, health: &mut HandlerHealth) -> bool {
        match health.tripped_at {
            Some(at) if at.elapsed() < self.cooldown => false,
            Some(_) => {
                health.tripped_at = None;
                health.consecutive_failures = 0;
                info!(handler = name, "hook handler re-enabled after cooldown");
                true
            },
            None if health.consecutive_failures >= self.threshold => {
                health.tripped_at = Some(Instant::now());
                warn!(
                    handler = name,
                    failures = health.consecutive_failures,
                    "hook handler disabled after repeated failures"
                );
                false
            },
            None => true,
        }
    }
}

struct Subscription {
    handler: Arc<dyn HookHandler>,
    health: Arc<Mutex<HandlerHealth>>,
}

impl Subscription {
    fn health(&self) -> MutexGuard<'_, HandlerHealth> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, ok: bool) {
        let mut health = self.health();
        health.calls += 1;
        if ok {
            health.consecutive_failures = 0;
        } else {
            health.failures += 1;
            health.consecutive_failures += 1;
        }
    }
}

// ── HookRegistry ────────────────────────────────────────────────────────────

/// Handlers by event. Dispatch runs the subscribed handlers concurrently.
pub struct HookRegistry {
    subscriptions: HashMap<HookEvent, Vec<Subscription>>,
    breaker: Breaker,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            breaker: Breaker {
                threshold: 3,
                cooldown: Duration::from_secs(60),
            },
        }
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self, threshold: u64, cooldown: Duration) -> Self {
        self.breaker = Breaker {
            threshold,
            cooldown,
        };
        self
    }

    pub fn register(&mut self, handler: Arc<dyn HookHandler>) {
        let health = Arc::new(Mutex::new(HandlerHealth::default()));
        for &event in handler.events() {
            self.subscriptions
                .entry(event)
                .or_default()
                .push(Subscription {
                    handler: Arc::clone(&handler),
                    health: Arc::clone(&health),
                });
        }
        debug!(
            handler = handler.name(),
            events = handler.events().len(),
            "hook handler registered"
        );
    }

    pub fn has_handlers(&self, event: HookEvent) -> bool {
        self.subscriptions
            .get(&event)
            .is_some_and(|subs| !subs.is_empty())
    }

    /// Counters of the handler called `name`.
    pub fn health(&self, name: &str) -> Option<HandlerHealth> {
        self.subscriptions
            .values()
            .flatten()
            .find(|sub| sub.handler.name() == name)
            .map(|sub| *sub.health())
    }

    /// Run every admitted handler for the payload's event. Handler errors are
    /// logged and counted, never returned.
    pub async fn dispatch(&self, payload: &HookPayload) {
        let event = payload.event();
        let Some(subs) = self.subscriptions.get(&event) else {
            return;
        };
        let admitted: Vec<&Subscription> = subs
            .iter()
            .filter(|sub| self.breaker.admit(sub.handler.name(), &mut sub.health()))
            .collect();
        if admitted.is_empty() {
            return;
        }
        debug!(%event, handlers = admitted.len(), "dispatching hook event");

        let runs = admitted.into_iter().map(|sub| async move {
            let result = sub.handler.handle(event, payload).await;
            sub.record(result.is_ok());
            (sub.handler.name(), result)
        });
        for (name, result) in futures::future::join_all(runs).await {
            if let Err(e) = result {
                warn!(handler = name, %event, error = %e, "hook handler failed");
            }
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

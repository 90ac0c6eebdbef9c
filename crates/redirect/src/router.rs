//! Per-account event router.
//!
//! One router task consumes the event stream of one authorized session in
//! arrival order and hands each event to the queues of the registrations
//! listening on its source conversation. It never waits on a worker: a full
//! queue drops the event.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use {
    telefeed_channels::{CloseReason, ConnectionEvent, ConversationId, InboundMessage, MessageId},
    telefeed_sessions::AccountKey,
    tokio::{
        sync::mpsc::{self, error::TrySendError},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::metrics::{counter, names};

/// A listener identity: at most one per (account, source, destination).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationKey {
    pub account: AccountKey,
    pub source: ConversationId,
    pub destination: ConversationId,
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.account, self.source, self.destination)
    }
}

/// Unit of work queued for a registration worker.
#[derive(Debug, Clone)]
pub(crate) enum Work {
    Message(InboundMessage),
    Edit(InboundMessage),
    Delete(Vec<MessageId>),
}

impl Work {
    fn from_event(event: ConnectionEvent) -> Option<(ConversationId, Self)> {
        match event {
            ConnectionEvent::NewMessage(m) => Some((m.conversation.clone(), Self::Message(m))),
            ConnectionEvent::Edited(m) => Some((m.conversation.clone(), Self::Edit(m))),
            ConnectionEvent::Deleted {
                conversation,
                message_ids,
            } => Some((conversation, Self::Delete(message_ids))),
            ConnectionEvent::Closed(_) => None,
        }
    }
}

struct Route {
    key: RegistrationKey,
    rule: String,
    sender: mpsc::Sender<Work>,
}

type RouteTable = HashMap<ConversationId, Vec<Route>>;

/// Why a router stopped on its own.
#[derive(Debug, Clone)]
pub(crate) struct RouterExit {
    pub account: AccountKey,
    pub generation: u64,
    pub reason: CloseReason,
}

/// Handle to a running router task.
pub(crate) struct Router {
    generation: u64,
    routes: Arc<RwLock<RouteTable>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Router {
    pub(crate) fn spawn(
        account: AccountKey,
        generation: u64,
        events: mpsc::Receiver<ConnectionEvent>,
        cancel: CancellationToken,
        exits: mpsc::UnboundedSender<RouterExit>,
    ) -> Self {
        let routes: Arc<RwLock<RouteTable>> = Arc::default();
        let task = tokio::spawn(run(
            account,
            generation,
            events,
            Arc::clone(&routes),
            cancel.clone(),
            exits,
        ));
        Self {
            generation,
            routes,
            cancel,
            task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn add_route(&self, key: &RegistrationKey, rule: &str, sender: mpsc::Sender<Work>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        let targets = routes.entry(key.source.clone()).or_default();
        targets.retain(|r| r.key != *key);
        targets.push(Route {
            key: key.clone(),
            rule: rule.to_string(),
            sender,
        });
    }

    pub(crate) fn remove_route(&self, key: &RegistrationKey) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(targets) = routes.get_mut(&key.source) {
            targets.retain(|r| r.key != *key);
            if targets.is_empty() {
                routes.remove(&key.source);
            }
        }
    }

    pub(crate) fn route_count(&self) -> usize {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.values().map(Vec::len).sum()
    }

    /// Cancel the task and wait for it to finish.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    account: AccountKey,
    generation: u64,
    mut events: mpsc::Receiver<ConnectionEvent>,
    routes: Arc<RwLock<RouteTable>>,
    cancel: CancellationToken,
    exits: mpsc::UnboundedSender<RouterExit>,
) {
    debug!(%account, generation, "router started");
    let reason = loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%account, generation, "router stopped");
                return;
            },
            event = events.recv() => event,
        };

        match event {
            Some(ConnectionEvent::Closed(reason)) => break reason,
            Some(event) => dispatch(&account, &routes, event),
            None => break CloseReason::Network("event stream ended".into()),
        }
    };

    if cancel.is_cancelled() || reason == CloseReason::Shutdown {
        return;
    }
    info!(%account, generation, ?reason, "account event stream closed");
    let _ = exits.send(RouterExit {
        account,
        generation,
        reason,
    });
}

fn dispatch(account: &AccountKey, routes: &RwLock<RouteTable>, event: ConnectionEvent) {
    let Some((source, work)) = Work::from_event(event) else {
        return;
    };
    let routes = routes.read().unwrap_or_else(|e| e.into_inner());
    let Some(targets) = routes.get(&source) else {
        return;
    };

    for route in targets {
        match route.sender.try_send(work.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                warn!(
                    %account,
                    rule = %route.rule,
                    source = %route.key.source,
                    destination = %route.key.destination,
                    "registration queue full, dropping event"
                );
                #[cfg(feature = "metrics")]
                counter!(names::EVENTS_DROPPED_TOTAL).increment(1);
            },
            Err(TrySendError::Closed(_)) => {
                debug!(%account, rule = %route.rule, "registration worker gone");
            },
        }
    }
}

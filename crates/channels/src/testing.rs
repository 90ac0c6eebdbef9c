//! In-memory platform for driving the engine without a network.
//!
//! [`FakePlatform`] implements [`Connector`] and hands out connections that
//! record every outbound call. Tests inject inbound events with
//! [`FakePlatform::emit`] and queue failures with [`FakePlatform::fail_next`].

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {async_trait::async_trait, secrecy::Secret, tokio::sync::mpsc};

use crate::{
    Error, Result,
    connection::{AccountConnection, Connected, Connector},
    invite::{InviteResolver, ResolvedConversation},
    types::{CloseReason, ConnectionEvent, ConversationId, MessageId},
};

/// Outbound call observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text {
        account: String,
        to: ConversationId,
        text: String,
        id: MessageId,
    },
    Copy {
        account: String,
        to: ConversationId,
        from: ConversationId,
        source_message_id: MessageId,
        id: MessageId,
    },
    Edit {
        account: String,
        conversation: ConversationId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        account: String,
        conversation: ConversationId,
        message_id: MessageId,
    },
}

/// Failure to return from the next outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Transient,
    RateLimited(Duration),
    Permanent,
    Unauthorized,
}

impl FakeFailure {
    fn into_error(self) -> Error {
        match self {
            Self::Transient => Error::transient("fake network error", None),
            Self::RateLimited(wait) => Error::transient("fake flood wait", Some(wait)),
            Self::Permanent => Error::permanent("fake chat not found"),
            Self::Unauthorized => Error::unauthorized("fake session revoked"),
        }
    }
}

struct Live {
    generation: u64,
    sender: mpsc::Sender<ConnectionEvent>,
}

#[derive(Default)]
struct State {
    live: HashMap<String, Live>,
    rejected: HashSet<String>,
    unreachable: HashSet<String>,
    failures: VecDeque<FakeFailure>,
    outbound: Vec<Outbound>,
    /// Current text (or empty for media) of every message the fake holds.
    messages: HashMap<(ConversationId, MessageId), String>,
    invites: HashMap<String, ResolvedConversation>,
}

struct Shared {
    state: Mutex<State>,
    next_message_id: AtomicI64,
    next_generation: AtomicU64,
    connects: AtomicUsize,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(&self) -> Result<()> {
        match self.lock().failures.pop_front() {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

/// Fake chat platform shared between a test and the code under test.
#[derive(Clone)]
pub struct FakePlatform {
    shared: Arc<Shared>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                next_message_id: AtomicI64::new(1000),
                next_generation: AtomicU64::new(1),
                connects: AtomicUsize::new(0),
            }),
        }
    }

    /// Reject future connects for `account` as unauthorized.
    pub fn reject(&self, account: &str) {
        self.shared.lock().rejected.insert(account.to_string());
    }

    /// Fail future connects for `account` with a network error.
    pub fn set_unreachable(&self, account: &str, unreachable: bool) {
        let mut state = self.shared.lock();
        if unreachable {
            state.unreachable.insert(account.to_string());
        } else {
            state.unreachable.remove(account);
        }
    }

    /// Queue a failure for the next outbound call on any connection.
    pub fn fail_next(&self, failure: FakeFailure) {
        self.shared.lock().failures.push_back(failure);
    }

    /// Make `link` resolvable by [`FakeResolver`].
    pub fn add_invite(&self, link: &str, id: impl Into<ConversationId>, title: &str) {
        self.shared.lock().invites.insert(link.to_string(), ResolvedConversation {
            id: id.into(),
            title: title.to_string(),
        });
    }

    /// Successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self, account: &str) -> bool {
        self.shared.lock().live.contains_key(account)
    }

    /// Deliver an inbound event to `account`. Returns `false` when the
    /// account has no live connection.
    pub async fn emit(&self, account: &str, event: ConnectionEvent) -> bool {
        let sender = self
            .shared
            .lock()
            .live
            .get(account)
            .map(|live| live.sender.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the account's stream with `reason`, as the platform would.
    pub async fn close(&self, account: &str, reason: CloseReason) {
        let live = self.shared.lock().live.remove(account);
        if let Some(live) = live {
            let _ = live.sender.send(ConnectionEvent::Closed(reason)).await;
        }
    }

    /// Every outbound call in order.
    pub fn outbound(&self) -> Vec<Outbound> {
        self.shared.lock().outbound.clone()
    }

    /// Current text of a message held by the fake, `None` once deleted.
    pub fn message_text(&self, conversation: &ConversationId, id: MessageId) -> Option<String> {
        self.shared
            .lock()
            .messages
            .get(&(conversation.clone(), id))
            .cloned()
    }

    /// Seed a source message so copies carry its content.
    pub fn seed_message(&self, conversation: &ConversationId, id: MessageId, text: &str) {
        self.shared
            .lock()
            .messages
            .insert((conversation.clone(), id), text.to_string());
    }

    pub fn resolver(&self) -> FakeResolver {
        FakeResolver {
            platform: self.clone(),
        }
    }

    fn next_id(&self) -> MessageId {
        self.shared.next_message_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakePlatform {
    fn platform(&self) -> &str {
        "fake"
    }

    async fn connect(&self, account: &str, _credential: &Secret<String>) -> Result<Connected> {
        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1024);
        {
            let mut state = self.shared.lock();
            if state.rejected.contains(account) {
                return Err(Error::unauthorized(format!("{account} is not authorized")));
            }
            if state.unreachable.contains(account) {
                return Err(Error::transient(format!("{account} unreachable"), None));
            }
            state.live.insert(account.to_string(), Live {
                generation,
                sender: tx,
            });
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        Ok(Connected {
            connection: Arc::new(FakeConnection {
                account: account.to_string(),
                generation,
                platform: self.clone(),
            }),
            events: rx,
            display_name: Some(format!("fake:{account}")),
        })
    }
}

/// Connection handed out by [`FakePlatform`].
pub struct FakeConnection {
    account: String,
    generation: u64,
    platform: FakePlatform,
}

#[async_trait]
impl AccountConnection for FakeConnection {
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<MessageId> {
        self.platform.shared.take_failure()?;
        let id = self.platform.next_id();
        let mut state = self.platform.shared.lock();
        state.messages.insert((to.clone(), id), text.to_string());
        state.outbound.push(Outbound::Text {
            account: self.account.clone(),
            to: to.clone(),
            text: text.to_string(),
            id,
        });
        Ok(id)
    }

    async fn copy_message(
        &self,
        to: &ConversationId,
        from: &ConversationId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        self.platform.shared.take_failure()?;
        let id = self.platform.next_id();
        let mut state = self.platform.shared.lock();
        let content = state
            .messages
            .get(&(from.clone(), message_id))
            .cloned()
            .unwrap_or_default();
        state.messages.insert((to.clone(), id), content);
        state.outbound.push(Outbound::Copy {
            account: self.account.clone(),
            to: to.clone(),
            from: from.clone(),
            source_message_id: message_id,
            id,
        });
        Ok(id)
    }

    async fn edit_text(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<()> {
        self.platform.shared.take_failure()?;
        let mut state = self.platform.shared.lock();
        let key = (conversation.clone(), message_id);
        match state.messages.get(&key) {
            None => return Err(Error::permanent("message to edit not found")),
            Some(current) if current == text => return Err(Error::NotModified),
            Some(_) => {},
        }
        state.messages.insert(key, text.to_string());
        state.outbound.push(Outbound::Edit {
            account: self.account.clone(),
            conversation: conversation.clone(),
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
    ) -> Result<()> {
        self.platform.shared.take_failure()?;
        let mut state = self.platform.shared.lock();
        state.messages.remove(&(conversation.clone(), message_id));
        state.outbound.push(Outbound::Delete {
            account: self.account.clone(),
            conversation: conversation.clone(),
            message_id,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.platform.shared.lock();
        if state
            .live
            .get(&self.account)
            .is_some_and(|live| live.generation == self.generation)
        {
            state.live.remove(&self.account);
        }
    }
}

/// [`InviteResolver`] over links registered with [`FakePlatform::add_invite`].
pub struct FakeResolver {
    platform: FakePlatform,
}

#[async_trait]
impl InviteResolver for FakeResolver {
    async fn resolve(&self, link: &str) -> Result<ResolvedConversation> {
        self.platform
            .shared
            .lock()
            .invites
            .get(link)
            .cloned()
            .ok_or_else(|| Error::resolution(link, "unknown link"))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret<String> {
        Secret::new("token".to_string())
    }

    #[tokio::test]
    async fn records_outbound_and_edits() {
        let platform = FakePlatform::new();
        let connected = platform.connect("acc", &secret()).await.unwrap();
        let conn = connected.connection;
        let dest = ConversationId::from("987654");

        let id = conn.send_text(&dest, "Hello").await.unwrap();
        assert_eq!(platform.message_text(&dest, id).as_deref(), Some("Hello"));

        assert!(matches!(
            conn.edit_text(&dest, id, "Hello").await,
            Err(Error::NotModified)
        ));
        conn.edit_text(&dest, id, "Hello world").await.unwrap();
        assert_eq!(
            platform.message_text(&dest, id).as_deref(),
            Some("Hello world")
        );

        conn.delete_message(&dest, id).await.unwrap();
        conn.delete_message(&dest, id).await.unwrap();
        assert!(platform.message_text(&dest, id).is_none());
        assert_eq!(platform.outbound().len(), 4);
    }

    #[tokio::test]
    async fn rejected_accounts_are_unauthorized() {
        let platform = FakePlatform::new();
        platform.reject("bad");
        assert!(matches!(
            platform.connect("bad", &secret()).await,
            Err(Error::Unauthorized { .. })
        ));
        platform.set_unreachable("flaky", true);
        assert!(matches!(
            platform.connect("flaky", &secret()).await,
            Err(Error::Transient { .. })
        ));
        assert_eq!(platform.connect_count(), 0);
    }

    #[tokio::test]
    async fn queued_failures_apply_once() {
        let platform = FakePlatform::new();
        let conn = platform.connect("acc", &secret()).await.unwrap().connection;
        platform.fail_next(FakeFailure::Transient);
        let dest = ConversationId::from("1");
        assert!(conn.send_text(&dest, "x").await.unwrap_err().is_transient());
        assert!(conn.send_text(&dest, "x").await.is_ok());
    }

    #[tokio::test]
    async fn emit_reaches_stream_until_closed() {
        let platform = FakePlatform::new();
        let mut connected = platform.connect("acc", &secret()).await.unwrap();
        let msg = crate::types::InboundMessage::text("-1001", 1, "hi");

        assert!(platform.emit("acc", ConnectionEvent::NewMessage(msg.clone())).await);
        assert_eq!(
            connected.events.recv().await,
            Some(ConnectionEvent::NewMessage(msg))
        );

        platform.close("acc", CloseReason::Network("reset".into())).await;
        assert_eq!(
            connected.events.recv().await,
            Some(ConnectionEvent::Closed(CloseReason::Network("reset".into())))
        );
        assert_eq!(connected.events.recv().await, None);
        assert!(!platform.is_connected("acc"));
    }
}

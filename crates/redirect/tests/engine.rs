#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end engine behavior against the in-memory fake platform.

use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    secrecy::Secret,
    telefeed_channels::{
        CloseReason, ConnectionEvent, ConversationId, InboundMessage, MediaKind, MessageId,
        RuleFilters,
        testing::{FakeFailure, FakePlatform, Outbound},
    },
    telefeed_common::hooks::{HookEvent, HookHandler, HookPayload, HookRegistry},
    telefeed_config::{EngineConfig, RetryConfig, SessionsConfig},
    telefeed_redirect::{InMemoryMappingStore, MappingKey, MappingStore, RedirectEngine},
    telefeed_rules::{InMemoryRuleStore, NewRule, RuleStore},
    telefeed_sessions::{
        AccountKey, FileSessionStore, InMemorySessionStore, SessionPool, SessionStatus,
        SessionStore,
    },
};

const OWNER: &str = "u1";
const ACCOUNT: &str = "acc";

struct Harness {
    platform: FakePlatform,
    engine: Arc<RedirectEngine>,
    rules: Arc<InMemoryRuleStore>,
    sessions: Arc<InMemorySessionStore>,
    mappings: Arc<InMemoryMappingStore>,
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        ..EngineConfig::default()
    }
}

fn sessions_config() -> SessionsConfig {
    SessionsConfig {
        reconnect_initial_backoff_ms: 1,
        reconnect_max_backoff_ms: 5,
        ..SessionsConfig::default()
    }
}

fn build(
    platform: FakePlatform,
    rules: Arc<InMemoryRuleStore>,
    sessions: Arc<InMemorySessionStore>,
    config: EngineConfig,
    hooks: Option<Arc<HookRegistry>>,
) -> Harness {
    let mappings = Arc::new(InMemoryMappingStore::new());
    let pool = Arc::new(SessionPool::new(
        Arc::new(platform.clone()),
        sessions.clone(),
        sessions_config(),
    ));
    let mut engine = RedirectEngine::new(rules.clone(), pool, mappings.clone(), config)
        .with_resolver(Arc::new(platform.resolver()));
    if let Some(hooks) = hooks {
        engine = engine.with_hooks(hooks);
    }
    Harness {
        platform,
        engine: Arc::new(engine),
        rules,
        sessions,
        mappings,
    }
}

async fn harness_with(config: EngineConfig) -> Harness {
    let h = build(
        FakePlatform::new(),
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(InMemorySessionStore::new()),
        config,
        None,
    );
    h.engine.start().await.unwrap();
    h.engine
        .register_session(OWNER, ACCOUNT, Secret::new("token".into()))
        .await
        .unwrap();
    h
}

async fn harness() -> Harness {
    harness_with(engine_config()).await
}

/// Poll `check` until it holds, failing after two seconds.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

impl Harness {
    async fn post(&self, source: &str, id: MessageId, text: &str) {
        let delivered = self
            .platform
            .emit(
                ACCOUNT,
                ConnectionEvent::NewMessage(InboundMessage::text(source, id, text)),
            )
            .await;
        assert!(delivered, "account is not connected");
    }

    async fn edit(&self, message: InboundMessage) {
        assert!(
            self.platform
                .emit(ACCOUNT, ConnectionEvent::Edited(message))
                .await
        );
    }

    async fn mapped(&self, source: &str, id: MessageId, destination: &str) -> MessageId {
        let key = MappingKey::new(source, id, destination);
        let mappings = self.mappings.clone();
        eventually("mapping entry", || {
            let key = key.clone();
            let mappings = mappings.clone();
            async move { mappings.get(&key).await.unwrap().is_some() }
        })
        .await;
        self.mappings.get(&key).await.unwrap().unwrap()
    }

    fn texts_to(&self, destination: &str) -> Vec<String> {
        let destination = ConversationId::from(destination);
        self.platform
            .outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Text { to, text, .. } if to == destination => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn one_registration_per_active_rule() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    h.engine
        .create_rule(OWNER, NewRule::new("r2", ACCOUNT, "-1003", "4"))
        .await
        .unwrap();
    h.engine
        .create_rule(OWNER, NewRule::new("dormant", "no-session", "-1005", "6"))
        .await
        .unwrap();
    assert_eq!(h.engine.registrations().await.len(), 2);

    h.engine.set_rule_active(OWNER, "r2", false).await.unwrap();
    let regs = h.engine.registrations().await;
    assert_eq!(regs.len(), 1);
    assert_eq!(regs[0].rule, "r1");
    assert_eq!(regs[0].key.source, ConversationId::from("-1001"));

    h.engine.set_rule_active(OWNER, "r2", true).await.unwrap();
    assert_eq!(h.engine.registrations().await.len(), 2);

    assert!(h.engine.remove_rule(OWNER, "r1").await.unwrap());
    assert!(!h.engine.remove_rule(OWNER, "r1").await.unwrap());
    assert_eq!(h.engine.registrations().await.len(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn duplicate_rule_name_is_rejected() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("promo", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let err = h
        .engine
        .create_rule(OWNER, NewRule::new("promo", ACCOUNT, "-1003", "4"))
        .await
        .unwrap_err();
    assert!(err.is_duplicate_rule());

    let rules = h.engine.list_rules(OWNER).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].source, ConversationId::from("-1001"));
    assert_eq!(h.engine.registrations().await.len(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn invite_rule_forwards_text_copy() {
    let h = harness().await;
    h.platform
        .add_invite("https://t.me/channelA", 123456_i64, "channelA");

    let rule = h
        .engine
        .create_rule_from_invite(
            OWNER,
            ACCOUNT,
            "https://t.me/channelA",
            "987654",
            RuleFilters::default(),
        )
        .await
        .unwrap();
    assert_eq!(rule.name, "from_channela");
    assert_eq!(rule.channel_name, "channelA");
    assert_eq!(rule.source, ConversationId::from("-100123456"));
    assert!(rule.active);

    h.post("-100123456", 42, "Hello").await;
    let copy = h.mapped("-100123456", 42, "987654").await;
    assert_eq!(
        h.platform
            .message_text(&ConversationId::from("987654"), copy)
            .as_deref(),
        Some("Hello")
    );
    assert_eq!(h.mappings.count().await.unwrap(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn unknown_invite_is_a_resolution_error() {
    let h = harness().await;
    let err = h
        .engine
        .create_rule_from_invite(OWNER, ACCOUNT, "https://t.me/nope", "2", RuleFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        telefeed_redirect::Error::Channel(telefeed_channels::Error::Resolution { .. })
    ));
    assert!(h.engine.list_rules(OWNER).await.unwrap().is_empty());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn edits_propagate_and_keep_the_mapping() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let dest = ConversationId::from("2");

    h.post("-1001", 7, "Hello").await;
    let copy = h.mapped("-1001", 7, "2").await;

    h.edit(InboundMessage::text("-1001", 7, "Hello world")).await;
    let platform = h.platform.clone();
    eventually("edited copy", || {
        let text = platform.message_text(&dest, copy);
        async move { text.as_deref() == Some("Hello world") }
    })
    .await;
    assert_eq!(h.mapped("-1001", 7, "2").await, copy);

    // Same text again is "not modified", which counts as success.
    h.edit(InboundMessage::text("-1001", 7, "Hello world")).await;
    // Edits of messages never forwarded are ignored.
    h.edit(InboundMessage::text("-1001", 8, "unseen")).await;
    h.post("-1001", 9, "barrier").await;
    h.mapped("-1001", 9, "2").await;

    let edits = h
        .platform
        .outbound()
        .into_iter()
        .filter(|o| matches!(o, Outbound::Edit { .. }))
        .count();
    assert_eq!(edits, 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn emptied_or_deleted_sources_delete_the_copy() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let dest = ConversationId::from("2");

    h.post("-1001", 1, "first").await;
    h.post("-1001", 2, "second").await;
    let first = h.mapped("-1001", 1, "2").await;
    let second = h.mapped("-1001", 2, "2").await;

    h.edit(InboundMessage {
        conversation: "-1001".into(),
        message_id: 1,
        text: None,
        media: None,
    })
    .await;
    assert!(
        h.platform
            .emit(ACCOUNT, ConnectionEvent::Deleted {
                conversation: "-1001".into(),
                message_ids: vec![2, 99],
            })
            .await
    );

    let mappings = h.mappings.clone();
    eventually("mappings removed", || {
        let mappings = mappings.clone();
        async move { mappings.count().await.unwrap() == 0 }
    })
    .await;
    assert!(h.platform.message_text(&dest, first).is_none());
    assert!(h.platform.message_text(&dest, second).is_none());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn failed_copy_delete_keeps_the_mapping() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let dest = ConversationId::from("2");

    h.post("-1001", 1, "first").await;
    let copy = h.mapped("-1001", 1, "2").await;

    h.platform.fail_next(FakeFailure::Permanent);
    h.edit(InboundMessage {
        conversation: "-1001".into(),
        message_id: 1,
        text: None,
        media: None,
    })
    .await;
    // The worker handles its queue in order, so once this lands the
    // emptying edit has been processed.
    h.post("-1001", 2, "second").await;
    h.mapped("-1001", 2, "2").await;

    let key = MappingKey::new("-1001", 1, "2");
    assert_eq!(h.mappings.get(&key).await.unwrap(), Some(copy));
    assert_eq!(h.platform.message_text(&dest, copy).as_deref(), Some("first"));

    // A later delete of the source still finds the copy.
    assert!(
        h.platform
            .emit(ACCOUNT, ConnectionEvent::Deleted {
                conversation: "-1001".into(),
                message_ids: vec![1],
            })
            .await
    );
    let mappings = h.mappings.clone();
    eventually("mapping removed", || {
        let mappings = mappings.clone();
        let key = key.clone();
        async move { mappings.get(&key).await.unwrap().is_none() }
    })
    .await;
    assert!(h.platform.message_text(&dest, copy).is_none());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn media_is_copied_and_empty_messages_get_a_placeholder() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();

    h.platform
        .seed_message(&ConversationId::from("-1001"), 5, "<photo>");
    assert!(
        h.platform
            .emit(
                ACCOUNT,
                ConnectionEvent::NewMessage(InboundMessage {
                    conversation: "-1001".into(),
                    message_id: 5,
                    text: None,
                    media: Some(MediaKind::Photo),
                })
            )
            .await
    );
    let copy = h.mapped("-1001", 5, "2").await;
    assert_eq!(
        h.platform
            .message_text(&ConversationId::from("2"), copy)
            .as_deref(),
        Some("<photo>")
    );
    assert!(h.platform.outbound().iter().any(|o| matches!(
        o,
        Outbound::Copy { source_message_id: 5, .. }
    )));

    assert!(
        h.platform
            .emit(
                ACCOUNT,
                ConnectionEvent::NewMessage(InboundMessage {
                    conversation: "-1001".into(),
                    message_id: 6,
                    text: Some(String::new()),
                    media: None,
                })
            )
            .await
    );
    h.mapped("-1001", 6, "2").await;
    assert_eq!(h.texts_to("2"), vec!["📎 Message transféré".to_string()]);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn filters_drop_and_rewrite_until_updated() {
    let h = harness().await;
    let filters = RuleFilters {
        whitelist: vec!["btc".into()],
        blacklist: vec!["scam".into()],
        replacements: vec![telefeed_channels::Replacement {
            from: "moon".into(),
            to: "up".into(),
        }],
    };
    h.engine
        .create_rule(
            OWNER,
            NewRule::new("r1", ACCOUNT, "-1001", "2").with_filters(filters),
        )
        .await
        .unwrap();

    h.post("-1001", 1, "eth only").await;
    h.post("-1001", 2, "BTC scam").await;
    h.post("-1001", 3, "BTC to the moon").await;
    h.mapped("-1001", 3, "2").await;
    assert_eq!(h.texts_to("2"), vec!["BTC to the up".to_string()]);
    assert_eq!(h.mappings.count().await.unwrap(), 1);

    h.engine
        .update_rule_filters(OWNER, "r1", RuleFilters::default())
        .await
        .unwrap();
    assert_eq!(h.engine.registrations().await.len(), 1);
    h.post("-1001", 4, "eth only").await;
    h.mapped("-1001", 4, "2").await;
    h.engine.shutdown().await;
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();

    h.platform.fail_next(FakeFailure::Transient);
    h.platform
        .fail_next(FakeFailure::RateLimited(Duration::from_millis(20)));
    h.post("-1001", 1, "eventually").await;
    h.mapped("-1001", 1, "2").await;
    assert_eq!(h.texts_to("2"), vec!["eventually".to_string()]);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn permanent_failure_skips_the_message_only() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();

    h.platform.fail_next(FakeFailure::Permanent);
    h.post("-1001", 1, "lost").await;
    h.post("-1001", 2, "delivered").await;
    h.mapped("-1001", 2, "2").await;

    let key = MappingKey::new("-1001", 1, "2");
    assert!(h.mappings.get(&key).await.unwrap().is_none());
    assert_eq!(h.texts_to("2"), vec!["delivered".to_string()]);
    assert!(h.rules.get(OWNER, "r1").await.unwrap().unwrap().active);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn full_queue_drops_new_events() {
    let config = EngineConfig {
        queue_capacity: 1,
        ..engine_config()
    };
    let h = harness_with(config).await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();

    h.platform
        .fail_next(FakeFailure::RateLimited(Duration::from_millis(300)));
    h.post("-1001", 1, "one").await;
    // Let the worker pick up the first message and start waiting out the limit.
    tokio::time::sleep(Duration::from_millis(50)).await;
    for (id, text) in [(2, "two"), (3, "three"), (4, "four")] {
        h.post("-1001", id, text).await;
    }

    h.mapped("-1001", 1, "2").await;
    h.mapped("-1001", 2, "2").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.texts_to("2"), vec!["one".to_string(), "two".to_string()]);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn restart_attaches_only_restored_sessions() {
    let rules = Arc::new(InMemoryRuleStore::new());
    let sessions = Arc::new(InMemorySessionStore::new());

    let first = build(
        FakePlatform::new(),
        rules.clone(),
        sessions.clone(),
        engine_config(),
        None,
    );
    first.engine.start().await.unwrap();
    for account in ["good", "revoked"] {
        first
            .engine
            .register_session(OWNER, account, Secret::new("token".into()))
            .await
            .unwrap();
    }
    first
        .engine
        .create_rule(OWNER, NewRule::new("a", "good", "-1001", "2"))
        .await
        .unwrap();
    first
        .engine
        .create_rule(OWNER, NewRule::new("b", "revoked", "-1003", "4"))
        .await
        .unwrap();
    assert_eq!(first.engine.registrations().await.len(), 2);
    first.engine.shutdown().await;

    let platform = FakePlatform::new();
    platform.reject("revoked");
    let second = build(platform, rules, sessions, engine_config(), None);
    let report = second.engine.start().await.unwrap();
    assert_eq!(report.registrations, 1);

    let regs = second.engine.registrations().await;
    assert_eq!(regs[0].rule, "a");
    let pool = second.engine.sessions();
    assert_eq!(
        pool.status(&AccountKey::new(OWNER, "good")),
        SessionStatus::Authorized
    );
    assert_eq!(
        pool.status(&AccountKey::new(OWNER, "revoked")),
        SessionStatus::Expired
    );
    assert_eq!(second.engine.list_rules(OWNER).await.unwrap().len(), 2);
    assert!(
        !second
            .sessions
            .load(&AccountKey::new(OWNER, "revoked"))
            .await
            .unwrap()
            .unwrap()
            .active
    );
    second.engine.shutdown().await;
}

#[tokio::test]
async fn messages_before_a_rule_are_not_forwarded() {
    let h = build(
        FakePlatform::new(),
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(InMemorySessionStore::new()),
        engine_config(),
        None,
    );
    h.engine
        .register_session(OWNER, ACCOUNT, Secret::new("token".into()))
        .await
        .unwrap();
    h.engine.start().await.unwrap();
    assert!(h.platform.is_connected(ACCOUNT));

    h.post("-1001", 1, "posted before rule").await;
    // Give the account's router time to consume the event with no routes.
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.engine
        .create_rule(OWNER, NewRule::new("late", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    h.post("-1001", 2, "posted after rule").await;
    h.mapped("-1001", 2, "2").await;

    assert_eq!(h.texts_to("2"), vec!["posted after rule".to_string()]);
    let early = MappingKey::new("-1001", 1, "2");
    assert!(h.mappings.get(&early).await.unwrap().is_none());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn revoked_session_detaches_its_rules() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    assert_eq!(h.engine.registrations().await.len(), 1);

    h.platform
        .close(ACCOUNT, CloseReason::Unauthorized("session revoked".into()))
        .await;
    let engine = h.engine.clone();
    eventually("registrations detached", || {
        let engine = engine.clone();
        async move { engine.registrations().await.is_empty() }
    })
    .await;
    assert_eq!(
        h.engine
            .sessions()
            .status(&AccountKey::new(OWNER, ACCOUNT)),
        SessionStatus::Expired
    );
    assert!(h.rules.get(OWNER, "r1").await.unwrap().unwrap().active);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn network_loss_reconnects_and_reattaches() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let before = h.engine.registrations().await[0].generation;

    h.platform
        .close(ACCOUNT, CloseReason::Network("connection reset".into()))
        .await;
    let engine = h.engine.clone();
    eventually("registration on a new connection", || {
        let engine = engine.clone();
        async move {
            engine
                .registrations()
                .await
                .first()
                .is_some_and(|r| r.generation > before)
        }
    })
    .await;
    assert_eq!(h.platform.connect_count(), 2);

    h.post("-1001", 1, "after reconnect").await;
    h.mapped("-1001", 1, "2").await;
    h.engine.shutdown().await;
}

#[tokio::test]
async fn logout_detaches_and_keeps_rules() {
    let h = harness().await;
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    h.engine.logout(OWNER, ACCOUNT).await.unwrap();

    assert!(h.engine.registrations().await.is_empty());
    assert_eq!(h.engine.list_rules(OWNER).await.unwrap().len(), 1);
    let sessions = h.engine.list_sessions(OWNER).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(!sessions[0].active);
    assert_eq!(sessions[0].status, SessionStatus::Expired);
    assert!(!h.platform.is_connected(ACCOUNT));

    assert!(h.engine.logout(OWNER, "unknown").await.is_err());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn failed_logout_write_keeps_the_session_attached() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let platform = FakePlatform::new();
    let store = Arc::new(
        FileSessionStore::open(data.join("sessions.json"))
            .await
            .unwrap(),
    );
    let pool = Arc::new(SessionPool::new(
        Arc::new(platform.clone()),
        store.clone(),
        sessions_config(),
    ));
    let engine = Arc::new(RedirectEngine::new(
        Arc::new(InMemoryRuleStore::new()),
        pool,
        Arc::new(InMemoryMappingStore::new()),
        engine_config(),
    ));
    engine.start().await.unwrap();
    engine
        .register_session(OWNER, ACCOUNT, Secret::new("token".into()))
        .await
        .unwrap();
    engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();
    let before = engine.registrations().await;
    assert_eq!(before.len(), 1);

    // A plain file where the data directory was makes every write fail.
    std::fs::remove_dir_all(&data).unwrap();
    std::fs::write(&data, b"").unwrap();

    assert!(engine.logout(OWNER, ACCOUNT).await.is_err());
    let key = AccountKey::new(OWNER, ACCOUNT);
    assert_eq!(engine.sessions().status(&key), SessionStatus::Authorized);
    assert!(platform.is_connected(ACCOUNT));
    assert!(store.load(&key).await.unwrap().unwrap().active);
    assert_eq!(engine.registrations().await, before);
    engine.shutdown().await;
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<HookPayload>>,
}

#[async_trait]
impl HookHandler for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn events(&self) -> &[HookEvent] {
        &[
            HookEvent::MessageForwarded,
            HookEvent::MessageEdited,
            HookEvent::ForwardFailed,
        ]
    }

    async fn handle(
        &self,
        _event: HookEvent,
        payload: &HookPayload,
    ) -> telefeed_common::Result<()> {
        self.seen.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

#[tokio::test]
async fn hooks_observe_forwards_and_failures() {
    let recorder = Arc::new(Recorder::default());
    let mut hooks = HookRegistry::new();
    hooks.register(recorder.clone());

    let h = build(
        FakePlatform::new(),
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(InMemorySessionStore::new()),
        engine_config(),
        Some(Arc::new(hooks)),
    );
    h.engine.start().await.unwrap();
    h.engine
        .register_session(OWNER, ACCOUNT, Secret::new("token".into()))
        .await
        .unwrap();
    h.engine
        .create_rule(OWNER, NewRule::new("r1", ACCOUNT, "-1001", "2"))
        .await
        .unwrap();

    h.platform.fail_next(FakeFailure::Permanent);
    h.post("-1001", 1, "fails").await;
    h.post("-1001", 2, "works").await;
    h.mapped("-1001", 2, "2").await;

    let probe = recorder.clone();
    eventually("forward hook", || {
        let count = probe.seen.lock().unwrap().len();
        async move { count == 2 }
    })
    .await;
    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    assert!(matches!(
        &seen[0],
        HookPayload::ForwardFailed { rule, .. } if rule == "r1"
    ));
    assert!(matches!(
        &seen[1],
        HookPayload::MessageForwarded { source_message_id: 2, text: Some(text), .. } if text == "works"
    ));
    h.engine.shutdown().await;
}

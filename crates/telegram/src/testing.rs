//! Local stand-in for the Bot API, served with axum.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    time::Duration,
};

use {
    axum::{Json, Router, body::Bytes, extract::State, http::Uri, routing::post},
    serde_json::{Value, json},
    teloxide::Bot,
    tokio::{sync::oneshot, task::JoinHandle},
};

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: String,
    pub body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    calls: Arc<Mutex<Vec<Call>>>,
    updates: Arc<Mutex<VecDeque<Value>>>,
    next_update_id: Arc<AtomicI64>,
    next_message_id: Arc<AtomicI64>,
    revoked: Arc<AtomicBool>,
}

pub(crate) struct MockTelegramApi {
    state: MockState,
    url: reqwest::Url,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl MockTelegramApi {
    pub(crate) async fn start() -> Self {
        let state = MockState::default();
        state.next_message_id.store(500, Ordering::SeqCst);
        let app = Router::new()
            .route("/{*path}", post(handle))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve mock telegram api");
        });

        Self {
            state,
            url: reqwest::Url::parse(&format!("http://{addr}/")).expect("parse api url"),
            shutdown,
            server,
        }
    }

    pub(crate) fn url(&self) -> reqwest::Url {
        self.url.clone()
    }

    pub(crate) fn bot(&self) -> Bot {
        Bot::new("test-token").set_api_url(self.url())
    }

    /// Requests received so far, polling excluded.
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    /// Queue an update for the next `getUpdates`. `update_id` is assigned.
    pub(crate) fn push_update(&self, mut update: Value) {
        let id = self.state.next_update_id.fetch_add(1, Ordering::SeqCst) + 1;
        update["update_id"] = json!(id);
        self.state.updates.lock().unwrap().push_back(update);
    }

    /// Answer every later request as if the token were revoked.
    pub(crate) fn revoke_token(&self) {
        self.state.revoked.store(true, Ordering::SeqCst);
    }

    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.server.await;
    }
}

async fn handle(State(state): State<MockState>, uri: Uri, body: Bytes) -> Json<Value> {
    let method = uri.path().rsplit('/').next().unwrap_or_default().to_string();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    if state.revoked.load(Ordering::SeqCst) {
        return Json(json!({ "ok": false, "error_code": 401, "description": "Unauthorized" }));
    }

    let result = match method.as_str() {
        "GetUpdates" => {
            let pending: Vec<Value> = state.updates.lock().unwrap().drain(..).collect();
            if pending.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            return Json(json!({ "ok": true, "result": pending }));
        },
        "GetMe" => json!({
            "id": 1,
            "is_bot": true,
            "first_name": "Feed",
            "username": "feed_bot",
            "can_join_groups": true,
            "can_read_all_group_messages": true,
            "supports_inline_queries": false
        }),
        "SendMessage" => {
            let id = state.next_message_id.fetch_add(1, Ordering::SeqCst);
            message(id, &body)
        },
        "EditMessageText" => message(body["message_id"].as_i64().unwrap_or_default(), &body),
        "CopyMessage" => json!({ "message_id": state.next_message_id.fetch_add(1, Ordering::SeqCst) }),
        "GetChat" => json!({
            "id": -100123456_i64,
            "type": "channel",
            "title": "channelA",
            "username": "channelA",
            "accent_color_id": 0,
            "max_reaction_count": 0
        }),
        _ => json!(true),
    };

    state.calls.lock().unwrap().push(Call {
        method,
        body: body.clone(),
    });
    Json(json!({ "ok": true, "result": result }))
}

fn message(id: i64, request: &Value) -> Value {
    json!({
        "message_id": id,
        "date": 0,
        "chat": { "id": request["chat_id"], "type": "channel", "title": "destination" },
        "text": request["text"]
    })
}

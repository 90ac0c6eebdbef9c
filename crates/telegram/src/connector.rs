use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    teloxide::prelude::*,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    telefeed_channels::{Connected, Connector, Error, Result},
    telefeed_config::TelegramConfig,
};

use crate::{
    connection::TelegramConnection,
    error::classify,
    poll::{self, PollSettings},
};

/// Inbound events buffered per bot before polling waits on the router.
const EVENT_BUFFER: usize = 1024;

/// Connects bot accounts. The session credential is the bot token.
#[derive(Debug, Clone)]
pub struct TelegramConnector {
    config: TelegramConfig,
    api_url: Option<reqwest::Url>,
}

impl TelegramConnector {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            api_url: None,
        }
    }

    /// Talk to a different Bot API server, such as a self-hosted one.
    #[must_use]
    pub fn with_api_url(mut self, url: reqwest::Url) -> Self {
        self.api_url = Some(url);
        self
    }

    /// Build a bot client for `token` with this connector's HTTP settings.
    pub fn bot(&self, token: &Secret<String>) -> Result<Bot> {
        // The client timeout must outlast the long-polling timeout so the
        // request is not aborted before Telegram answers.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(self.config.client_timeout_secs))
            .build()
            .map_err(|e| Error::external("build telegram http client", e))?;
        let bot = Bot::with_client(token.expose_secret(), client);
        Ok(match &self.api_url {
            Some(url) => bot.set_api_url(url.clone()),
            None => bot,
        })
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    fn platform(&self) -> &str {
        "telegram"
    }

    async fn connect(&self, account: &str, credential: &Secret<String>) -> Result<Connected> {
        let bot = self.bot(credential)?;

        let me = bot.get_me().await.map_err(|e| classify("get_me", e))?;
        bot.delete_webhook()
            .send()
            .await
            .map_err(|e| classify("delete_webhook", e))?;
        info!(
            account,
            username = ?me.username,
            "telegram bot connected (webhook cleared)"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(poll::run(
            account.to_string(),
            bot.clone(),
            tx,
            cancel.clone(),
            PollSettings {
                timeout_secs: self.config.poll_timeout_secs,
                error_backoff: Duration::from_secs(self.config.poll_error_backoff_secs),
            },
        ));

        Ok(Connected {
            connection: Arc::new(TelegramConnection {
                account: account.to_string(),
                bot,
                cancel,
            }),
            events: rx,
            display_name: me.username.clone(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::MockTelegramApi,
        serde_json::json,
        telefeed_channels::{CloseReason, ConnectionEvent, InboundMessage},
    };

    fn connector(api: &MockTelegramApi) -> TelegramConnector {
        TelegramConnector::new(TelegramConfig {
            poll_timeout_secs: 0,
            client_timeout_secs: 5,
            poll_error_backoff_secs: 0,
            ..TelegramConfig::default()
        })
        .with_api_url(api.url())
    }

    async fn next(connected: &mut Connected) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(2), connected.events.recv())
            .await
            .expect("event in time")
            .expect("stream open")
    }

    #[tokio::test]
    async fn polls_channel_posts_and_edits() {
        let api = MockTelegramApi::start().await;
        let mut connected = connector(&api)
            .connect("feed_bot", &Secret::new("test-token".into()))
            .await
            .unwrap();
        assert_eq!(connected.display_name.as_deref(), Some("feed_bot"));

        let chat = json!({ "id": -100123456, "type": "channel", "title": "channelA" });
        api.push_update(json!({
            "channel_post": { "message_id": 42, "date": 1, "chat": chat, "text": "Hello" }
        }));
        api.push_update(json!({
            "edited_channel_post": {
                "message_id": 42, "date": 1, "edit_date": 2, "chat": chat, "text": "Hello world"
            }
        }));

        assert_eq!(
            next(&mut connected).await,
            ConnectionEvent::NewMessage(InboundMessage::text("-100123456", 42, "Hello"))
        );
        assert_eq!(
            next(&mut connected).await,
            ConnectionEvent::Edited(InboundMessage::text("-100123456", 42, "Hello world"))
        );
        let methods: Vec<String> = api.calls().into_iter().map(|c| c.method).collect();
        assert_eq!(methods, ["GetMe", "DeleteWebhook"]);

        connected.connection.disconnect().await;
        api.stop().await;
    }

    #[tokio::test]
    async fn revoked_token_closes_the_stream() {
        let api = MockTelegramApi::start().await;
        let mut connected = connector(&api)
            .connect("feed_bot", &Secret::new("test-token".into()))
            .await
            .unwrap();

        api.revoke_token();
        assert!(matches!(
            next(&mut connected).await,
            ConnectionEvent::Closed(CloseReason::Unauthorized(_))
        ));
        api.stop().await;
    }

    #[tokio::test]
    async fn rejected_token_fails_to_connect() {
        let api = MockTelegramApi::start().await;
        api.revoke_token();
        let err = connector(&api)
            .connect("feed_bot", &Secret::new("bad".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
        api.stop().await;
    }
}

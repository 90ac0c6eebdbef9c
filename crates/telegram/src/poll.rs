//! Long-polling loop turning Bot API updates into connection events.

use std::time::Duration;

use {
    teloxide::{
        ApiError, RequestError,
        prelude::*,
        types::{AllowedUpdate, UpdateKind},
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use telefeed_channels::{CloseReason, ConnectionEvent, ConversationId, InboundMessage, MediaKind};

#[derive(Debug, Clone, Copy)]
pub(crate) struct PollSettings {
    pub timeout_secs: u32,
    pub error_backoff: Duration,
}

/// Poll until `cancel` fires or the token stops working. Bot accounts see
/// channel posts and group messages with their edits; the Bot API reports no
/// deletions.
pub(crate) async fn run(
    account: String,
    bot: Bot,
    events: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
    settings: PollSettings,
) {
    info!(account, "starting telegram polling loop");
    let mut offset: i32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = bot
                .get_updates()
                .offset(offset)
                .timeout(settings.timeout_secs)
                .allowed_updates(vec![
                    AllowedUpdate::ChannelPost,
                    AllowedUpdate::EditedChannelPost,
                    AllowedUpdate::Message,
                    AllowedUpdate::EditedMessage,
                ])
                .send() => result,
        };

        match result {
            Ok(updates) => {
                debug!(account, count = updates.len(), "got telegram updates");
                for update in updates {
                    offset = update.id.as_offset();
                    let Some(event) = to_event(update.kind) else {
                        continue;
                    };
                    let delivered = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => false,
                        sent = events.send(event) => sent.is_ok(),
                    };
                    if !delivered {
                        debug!(account, "event stream dropped, polling stopped");
                        return;
                    }
                }
            },
            Err(RequestError::Api(ApiError::InvalidToken)) => {
                warn!(account, "telegram bot token rejected, polling stopped");
                close(&events, CloseReason::Unauthorized("bot token revoked".into())).await;
                return;
            },
            Err(RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                warn!(
                    account,
                    "another instance is already polling with this token, polling stopped"
                );
                close(
                    &events,
                    CloseReason::Unauthorized("token in use by another instance".into()),
                )
                .await;
                return;
            },
            Err(e) => {
                warn!(account, error = %e, "telegram getUpdates failed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.error_backoff) => {},
                }
            },
        }
    }
    info!(account, "telegram polling stopped");
}

async fn close(events: &mpsc::Sender<ConnectionEvent>, reason: CloseReason) {
    let _ = events.send(ConnectionEvent::Closed(reason)).await;
}

fn to_event(kind: UpdateKind) -> Option<ConnectionEvent> {
    match kind {
        UpdateKind::Message(msg) | UpdateKind::ChannelPost(msg) => {
            Some(ConnectionEvent::NewMessage(inbound(&msg)))
        },
        UpdateKind::EditedMessage(msg) | UpdateKind::EditedChannelPost(msg) => {
            Some(ConnectionEvent::Edited(inbound(&msg)))
        },
        _ => None,
    }
}

fn inbound(msg: &Message) -> InboundMessage {
    InboundMessage {
        conversation: ConversationId::from(msg.chat.id.0),
        message_id: i64::from(msg.id.0),
        text: msg.text().map(str::to_string),
        media: media_kind(msg),
    }
}

fn media_kind(msg: &Message) -> Option<MediaKind> {
    // Animations also carry a document, so they are checked first.
    if msg.photo().is_some() {
        Some(MediaKind::Photo)
    } else if msg.animation().is_some() {
        Some(MediaKind::Animation)
    } else if msg.video().is_some() {
        Some(MediaKind::Video)
    } else if msg.voice().is_some() {
        Some(MediaKind::Voice)
    } else if msg.audio().is_some() {
        Some(MediaKind::Audio)
    } else if msg.document().is_some() {
        Some(MediaKind::Document)
    } else if msg.sticker().is_some() {
        Some(MediaKind::Sticker)
    } else if msg.video_note().is_some() || msg.location().is_some() || msg.poll().is_some() {
        Some(MediaKind::Other)
    } else {
        None
    }
}

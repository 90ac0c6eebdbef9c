use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Platform message identifier.
pub type MessageId = i64;

/// String-encoded platform conversation identifier.
///
/// Telegram ids are numeric, with channels and supergroups carrying the
/// `-100` marker (`-1001234567890`). The string form is what gets persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form used by platform APIs.
    pub fn as_i64(&self) -> Result<i64> {
        Ok(self.0.parse::<i64>()?)
    }

    /// Canonical id for a channel resolved from a link: positive raw ids get
    /// the supergroup marker, already-marked or negative ids pass through.
    pub fn from_channel_id(raw: i64) -> Self {
        if raw > 0 {
            Self(format!("-100{raw}"))
        } else {
            Self(raw.to_string())
        }
    }

    /// Reject ids that are not numeric.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::invalid_input("conversation id is empty"));
        }
        self.as_i64()
            .map(|_| ())
            .map_err(|_| Error::invalid_input(format!("conversation id is not numeric: {}", self.0)))
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConversationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<i64> for ConversationId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Coarse media classification; the payload itself stays on the platform and
/// is copied by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Audio,
    Voice,
    Document,
    Sticker,
    Other,
}

/// A message observed in a source conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation: ConversationId,
    pub message_id: MessageId,
    /// Body of a text message. Media captions are not text.
    pub text: Option<String>,
    pub media: Option<MediaKind>,
}

impl InboundMessage {
    pub fn text(conversation: impl Into<ConversationId>, message_id: MessageId, text: &str) -> Self {
        Self {
            conversation: conversation.into(),
            message_id,
            text: Some(text.to_string()),
            media: None,
        }
    }

    /// Non-empty text body, if any.
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Neither text nor media: deleted, or a service message.
    pub fn is_empty(&self) -> bool {
        self.body().is_none() && self.media.is_none()
    }
}

/// Why a connection's event stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Credentials revoked; the session must be re-verified.
    Unauthorized(String),
    /// Network loss; the session may reconnect.
    Network(String),
    /// Closed on request.
    Shutdown,
}

/// Inbound activity on one account connection, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    NewMessage(InboundMessage),
    Edited(InboundMessage),
    Deleted {
        conversation: ConversationId,
        message_ids: Vec<MessageId>,
    },
    Closed(CloseReason),
}

impl ConnectionEvent {
    /// Source conversation the event belongs to, if any.
    pub fn conversation(&self) -> Option<&ConversationId> {
        match self {
            Self::NewMessage(m) | Self::Edited(m) => Some(&m.conversation),
            Self::Deleted { conversation, .. } => Some(conversation),
            Self::Closed(_) => None,
        }
    }
}

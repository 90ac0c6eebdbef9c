use std::sync::Arc;

use {async_trait::async_trait, secrecy::Secret, tokio::sync::mpsc};

use crate::{
    Result,
    types::{ConnectionEvent, ConversationId, MessageId},
};

/// Outbound operations on one authenticated account.
///
/// Implementations classify platform failures into [`crate::Error`] variants:
/// `Transient` for network trouble and rate limits, `Permanent` for missing
/// conversations or permissions, `NotModified` for no-op edits and
/// `Unauthorized` for revoked credentials.
#[async_trait]
pub trait AccountConnection: Send + Sync {
    /// Send a plain text message, returning the new message id.
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<MessageId>;

    /// Copy an existing message (media included) without a forward header.
    async fn copy_message(
        &self,
        to: &ConversationId,
        from: &ConversationId,
        message_id: MessageId,
    ) -> Result<MessageId>;

    async fn edit_text(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<()>;

    /// Delete a message. A message that is already gone is not an error.
    async fn delete_message(&self, conversation: &ConversationId, message_id: MessageId)
    -> Result<()>;

    /// Stop receiving updates and close the event stream.
    async fn disconnect(&self);
}

/// A live connection and the stream of its inbound events.
pub struct Connected {
    pub connection: Arc<dyn AccountConnection>,
    /// Ends with a [`ConnectionEvent::Closed`] when the connection drops.
    pub events: mpsc::Receiver<ConnectionEvent>,
    /// Human-readable account name reported by the platform.
    pub display_name: Option<String>,
}

impl std::fmt::Debug for Connected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connected")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Opens authenticated connections from stored credentials.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Platform identifier (`"telegram"`).
    fn platform(&self) -> &str;

    /// Connect and verify `account`. Rejected credentials yield
    /// [`crate::Error::Unauthorized`]; network trouble yields
    /// [`crate::Error::Transient`].
    async fn connect(&self, account: &str, credential: &Secret<String>) -> Result<Connected>;
}

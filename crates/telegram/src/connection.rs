//! Outbound Bot API calls for one bot account.

use {
    async_trait::async_trait,
    teloxide::{
        prelude::*,
        types::{ChatId, MessageId as TgMessageId},
    },
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use telefeed_channels::{AccountConnection, ConversationId, Error, MessageId, Result};

use crate::error::{classify, is_already_deleted};

/// Connection handed to the engine. Retries are the caller's concern; every
/// method makes exactly one request.
pub struct TelegramConnection {
    pub(crate) account: String,
    pub(crate) bot: Bot,
    /// Stops the polling loop feeding this connection's event stream.
    pub(crate) cancel: CancellationToken,
}

impl TelegramConnection {
    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

pub(crate) fn chat_id(conversation: &ConversationId) -> Result<ChatId> {
    Ok(ChatId(conversation.as_i64()?))
}

pub(crate) fn tg_message_id(id: MessageId) -> Result<TgMessageId> {
    i32::try_from(id)
        .map(TgMessageId)
        .map_err(|_| Error::invalid_input(format!("message id out of range: {id}")))
}

#[async_trait]
impl AccountConnection for TelegramConnection {
    async fn send_text(&self, to: &ConversationId, text: &str) -> Result<MessageId> {
        let message = self
            .bot
            .send_message(chat_id(to)?, text)
            .await
            .map_err(|e| classify("send_message", e))?;
        Ok(i64::from(message.id.0))
    }

    async fn copy_message(
        &self,
        to: &ConversationId,
        from: &ConversationId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        let copied = self
            .bot
            .copy_message(chat_id(to)?, chat_id(from)?, tg_message_id(message_id)?)
            .await
            .map_err(|e| classify("copy_message", e))?;
        Ok(i64::from(copied.0))
    }

    async fn edit_text(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
        text: &str,
    ) -> Result<()> {
        self.bot
            .edit_message_text(chat_id(conversation)?, tg_message_id(message_id)?, text)
            .await
            .map_err(|e| classify("edit_message_text", e))?;
        Ok(())
    }

    async fn delete_message(
        &self,
        conversation: &ConversationId,
        message_id: MessageId,
    ) -> Result<()> {
        match self
            .bot
            .delete_message(chat_id(conversation)?, tg_message_id(message_id)?)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_already_deleted(&e) => {
                debug!(
                    account = %self.account,
                    conversation = %conversation,
                    message_id,
                    "message already deleted"
                );
                Ok(())
            },
            Err(e) => Err(classify("delete_message", e)),
        }
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
    }
}

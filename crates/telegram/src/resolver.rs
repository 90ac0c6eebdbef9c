use {
    async_trait::async_trait,
    teloxide::{prelude::*, types::Recipient},
    tracing::debug,
};

use telefeed_channels::{
    ConversationId, Error, InviteLink, InviteResolver, ResolvedConversation, Result,
};

use crate::error::classify;

/// Resolves public channel links and numeric ids with `getChat`.
///
/// Bots cannot join through invite hashes, so private `t.me/+HASH` and
/// `t.me/joinchat/HASH` links are rejected with a resolution error. Use the
/// channel's public link or numeric id instead. The bot must already be a
/// member (or admin) of the channel it reads.
///
/// Rules are named by [`ResolvedConversation::rule_name`]. A title with no
/// letters, digits, `_` or `-` (for example only emoji) gets the same
/// `channel_to_bot` name as an untitled conversation, not a bare `from_`.
pub struct TelegramInviteResolver {
    bot: Bot,
}

impl TelegramInviteResolver {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl InviteResolver for TelegramInviteResolver {
    async fn resolve(&self, link: &str) -> Result<ResolvedConversation> {
        let recipient = match InviteLink::parse(link)? {
            InviteLink::Private(_) => {
                return Err(Error::resolution(
                    link,
                    "bot accounts cannot join through private invite links",
                ));
            },
            InviteLink::Public(name) => Recipient::ChannelUsername(format!("@{name}")),
            InviteLink::Id(id) => Recipient::Id(ChatId(id.as_i64()?)),
        };

        let chat = self
            .bot
            .get_chat(recipient)
            .await
            .map_err(|e| match classify("get_chat", e) {
                Error::Permanent { context } => Error::resolution(link, context),
                other => other,
            })?;

        let title = chat.title().unwrap_or_default().to_string();
        debug!(link, id = chat.id.0, %title, "resolved telegram conversation");
        Ok(ResolvedConversation {
            id: ConversationId::from(chat.id.0),
            title,
        })
    }
}

//! Shareable conversation links.

use async_trait::async_trait;

use crate::{Error, Result, types::ConversationId};

/// Conversation identity obtained from a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConversation {
    pub id: ConversationId,
    pub title: String,
}

impl ResolvedConversation {
    /// Rule name derived from the conversation title: `from_` followed by the
    /// title's alphanumerics, `_` and `-`, lowercased and cut to 20 chars.
    /// Titles that keep no such characters, untitled ones included, fall back
    /// to `channel_to_bot`.
    pub fn rule_name(&self) -> String {
        let clean: String = self
            .title
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .flat_map(char::to_lowercase)
            .take(20)
            .collect();
        if clean.is_empty() {
            return "channel_to_bot".to_string();
        }
        format!("from_{clean}")
    }
}

/// Parsed shareable link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteLink {
    /// `t.me/+HASH` or `t.me/joinchat/HASH`.
    Private(String),
    /// `t.me/NAME` or `@NAME`.
    Public(String),
    /// A raw numeric conversation id.
    Id(ConversationId),
}

impl InviteLink {
    pub fn parse(link: &str) -> Result<Self> {
        let link = link.trim();
        if link.is_empty() {
            return Err(Error::resolution(link, "empty link"));
        }

        if let Ok(id) = link.parse::<i64>() {
            return Ok(Self::Id(ConversationId::from(id)));
        }
        if let Some(name) = link.strip_prefix('@') {
            return Self::public(link, name);
        }

        let path = link
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");
        let Some(path) = path
            .strip_prefix("t.me/")
            .or_else(|| path.strip_prefix("telegram.me/"))
        else {
            return Err(Error::resolution(link, "not a t.me link"));
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let path = path.trim_end_matches('/');

        if let Some(hash) = path.strip_prefix('+') {
            return Self::private(link, hash);
        }
        if let Some(hash) = path.strip_prefix("joinchat/") {
            return Self::private(link, hash);
        }
        Self::public(link, path)
    }

    fn private(link: &str, hash: &str) -> Result<Self> {
        if hash.is_empty() || hash.contains('/') {
            return Err(Error::resolution(link, "malformed invite hash"));
        }
        Ok(Self::Private(hash.to_string()))
    }

    fn public(link: &str, name: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::resolution(link, "malformed username"));
        }
        Ok(Self::Public(name.to_string()))
    }
}

/// Turns a shareable link into a conversation identity and title.
#[async_trait]
pub trait InviteResolver: Send + Sync {
    async fn resolve(&self, link: &str) -> Result<ResolvedConversation>;
}

//! Telegram Bot API connector for telefeed.
//!
//! Each session is a bot token. Inbound posts arrive through `getUpdates`
//! long polling; outbound sends, copies, edits and deletes use teloxide.

pub mod connection;
pub mod connector;
pub mod error;
mod poll;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use {
    connection::TelegramConnection, connector::TelegramConnector, error::classify,
    resolver::TelegramInviteResolver,
};

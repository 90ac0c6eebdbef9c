//! Platform-neutral seams shared by the redirection engine and the platform
//! adapters: account connections, inbound events, filters and invite links.

pub mod connection;
pub mod error;
pub mod filter;
pub mod invite;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use {
    connection::{AccountConnection, Connected, Connector},
    error::{Error, Result},
    filter::{
        FilterChain, FilterOutcome, FilterProvider, KeywordFilterChain, KeywordFilterProvider,
        Replacement, RuleFilters,
    },
    invite::{InviteLink, InviteResolver, ResolvedConversation},
    types::{CloseReason, ConnectionEvent, ConversationId, InboundMessage, MediaKind, MessageId},
};

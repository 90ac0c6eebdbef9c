use std::{error::Error as StdError, time::Duration};

/// Crate-wide result type for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed platform errors shared by every adapter.
///
/// Adapters classify their native errors into these variants so the engine
/// can decide between retrying, logging and moving on, or expiring a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// Operation is currently unavailable (not connected, shut down).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Credentials were rejected or revoked. Requires re-verification.
    #[error("account not authorized: {message}")]
    Unauthorized { message: String },

    /// Network trouble or platform rate limiting. Worth retrying.
    #[error("transient failure: {context}")]
    Transient {
        context: String,
        /// Platform-suggested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// The platform refused the request for good (missing conversation,
    /// permission denied, blocked).
    #[error("permanent failure: {context}")]
    Permanent { context: String },

    /// An edit carried the same content as the current message.
    #[error("message content not modified")]
    NotModified,

    /// A shareable link could not be turned into a conversation.
    #[error("cannot resolve {link}: {reason}")]
    Resolution { link: String, reason: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// Integer parsing failed.
    #[error(transparent)]
    ParseInt(#[from] std::num::ParseIntError),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unauthorized(message: impl std::fmt::Display) -> Self {
        Self::Unauthorized {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transient(context: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::Transient {
            context: context.into(),
            retry_after,
        }
    }

    #[must_use]
    pub fn permanent(context: impl Into<String>) -> Self {
        Self::Permanent {
            context: context.into(),
        }
    }

    #[must_use]
    pub fn resolution(link: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            link: link.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Platform-suggested wait, if the error carried one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

use std::fmt;

use thiserror::Error;

/// How a failed platform call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardErrorKind {
    /// Retried with backoff; reported once retries are exhausted.
    Transient,
    /// Logged and skipped; the next message is attempted.
    Permanent,
}

impl fmt::Display for ForwardErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Rules(#[from] telefeed_rules::Error),

    #[error(transparent)]
    Sessions(#[from] telefeed_sessions::Error),

    #[error(transparent)]
    Channel(#[from] telefeed_channels::Error),

    #[error("{kind} forward failure for rule '{rule}': {source}")]
    Forward {
        kind: ForwardErrorKind,
        rule: String,
        #[source]
        source: telefeed_channels::Error,
    },

    #[error("no invite resolver configured")]
    ResolverUnavailable,

    #[error("message mapping store failed: {context}")]
    Mapping {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("redirect engine is shut down")]
    ShutDown,
}

impl Error {
    #[must_use]
    pub fn forward(rule: impl Into<String>, source: telefeed_channels::Error) -> Self {
        let kind = if source.is_transient() {
            ForwardErrorKind::Transient
        } else {
            ForwardErrorKind::Permanent
        };
        Self::Forward {
            kind,
            rule: rule.into(),
            source,
        }
    }

    #[must_use]
    pub fn mapping(context: impl Into<String>) -> Self {
        Self::Mapping {
            context: context.into(),
            source: None,
        }
    }

    /// Whether the error is `DuplicateRule` from the rule store.
    pub fn is_duplicate_rule(&self) -> bool {
        matches!(
            self,
            Self::Rules(telefeed_rules::Error::DuplicateRule { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

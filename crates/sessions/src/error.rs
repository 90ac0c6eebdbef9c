use thiserror::Error;

use crate::types::AccountKey;

#[derive(Debug, Error)]
pub enum Error {
    /// No usable session: the record is missing or inactive, or the platform
    /// refused to authorize it.
    #[error("session {key} unavailable: {reason}")]
    SessionUnavailable { key: AccountKey, reason: String },

    #[error("session {key} not found")]
    SessionNotFound { key: AccountKey },

    #[error("session store persistence failed: {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn unavailable(key: &AccountKey, reason: impl std::fmt::Display) -> Self {
        Self::SessionUnavailable {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(key: &AccountKey) -> Self {
        Self::SessionNotFound { key: key.clone() }
    }

    #[must_use]
    pub fn persistence(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

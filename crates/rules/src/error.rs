use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("rule '{name}' already exists for owner {owner}")]
    DuplicateRule { owner: String, name: String },

    #[error("rule '{name}' not found for owner {owner}")]
    RuleNotFound { owner: String, name: String },

    #[error("invalid rule: {message}")]
    InvalidRule { message: String },

    /// The rule document could not be read or written. The in-memory view
    /// is left as it was before the failed operation.
    #[error("rule store persistence failed: {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn duplicate(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateRule {
            owner: owner.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn not_found(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self::RuleNotFound {
            owner: owner.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
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

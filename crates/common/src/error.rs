use thiserror::Error;

/// Failures reported by hook handlers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("hook handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn handler(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

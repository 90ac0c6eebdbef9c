//! Bot API error classification.

use teloxide::{ApiError, RequestError};

use telefeed_channels::Error;

/// Map a Bot API failure onto the engine's retry semantics.
///
/// `operation` names the call for log and error context.
pub fn classify(operation: &str, error: RequestError) -> Error {
    match error {
        RequestError::RetryAfter(wait) => {
            Error::transient(format!("{operation}: rate limited"), Some(wait.duration()))
        },
        RequestError::Network(e) => Error::transient(format!("{operation}: {e}"), None),
        RequestError::Io(e) => Error::transient(format!("{operation}: {e}"), None),
        RequestError::Api(api) => classify_api(operation, api),
        other => Error::external(operation.to_string(), other),
    }
}

fn classify_api(operation: &str, error: ApiError) -> Error {
    match error {
        ApiError::MessageNotModified => Error::NotModified,
        ApiError::InvalidToken => Error::unauthorized(format!("{operation}: invalid bot token")),
        // Missing chats, blocked or kicked bots, missing rights: retrying
        // the same request cannot succeed.
        other => Error::permanent(format!("{operation}: {other}")),
    }
}

/// Deleting a message that is already gone counts as success.
pub(crate) fn is_already_deleted(error: &RequestError) -> bool {
    matches!(error, RequestError::Api(ApiError::MessageToDeleteNotFound))
}

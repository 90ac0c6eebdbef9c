//! Metric names emitted when the `metrics` feature is enabled.

pub(crate) use metrics::{counter, gauge};

pub mod names {
    /// Messages copied to a destination.
    pub const MESSAGES_FORWARDED_TOTAL: &str = "telefeed_messages_forwarded_total";
    /// Source messages dropped by a rule's filters.
    pub const MESSAGES_FILTERED_TOTAL: &str = "telefeed_messages_filtered_total";
    /// Forwards, edits or deletions that failed after retries.
    pub const FORWARD_FAILURES_TOTAL: &str = "telefeed_forward_failures_total";
    /// Transient failures that were retried.
    pub const FORWARD_RETRIES_TOTAL: &str = "telefeed_forward_retries_total";
    pub const EDITS_PROPAGATED_TOTAL: &str = "telefeed_edits_propagated_total";
    pub const DELETIONS_PROPAGATED_TOTAL: &str = "telefeed_deletions_propagated_total";
    /// Events dropped because a registration queue was full.
    pub const EVENTS_DROPPED_TOTAL: &str = "telefeed_events_dropped_total";
    /// Live handler registrations.
    pub const REGISTRATIONS: &str = "telefeed_registrations";
}

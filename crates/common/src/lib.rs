//! Shared pieces used across the telefeed crates: errors, retry backoff,
//! atomic file writes and the post-forward hook system.

pub mod backoff;
pub mod error;
pub mod fs;
pub mod hooks;

pub use {
    backoff::Backoff,
    error::{Error, Result},
};

//! Account session pool: one authenticated platform connection per
//! (owner, account), restored from persisted credentials.

pub mod error;
pub mod pool;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

pub use {
    error::{Error, Result},
    pool::{SessionHandle, SessionPool},
    store::SessionStore,
    store_file::FileSessionStore,
    store_memory::InMemorySessionStore,
    types::{AccountKey, SessionInfo, SessionRecord, SessionStatus},
};

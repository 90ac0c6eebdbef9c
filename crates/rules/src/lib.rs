//! Durable redirection rules keyed by (owner, rule name).

pub mod error;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

pub use {
    error::{Error, Result},
    store::RuleStore,
    store_file::FileRuleStore,
    store_memory::InMemoryRuleStore,
    types::{NewRule, Rule, RuleDocument},
};

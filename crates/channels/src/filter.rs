//! Content filters applied to a source message before it is forwarded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::InboundMessage;

/// Result of running a message through a filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Forward this (possibly transformed) message.
    Forward(InboundMessage),
    /// Do not forward; the string says why.
    Drop(String),
}

/// Ordered, synchronous content checks and transforms.
pub trait FilterChain: Send + Sync {
    fn apply(&self, message: InboundMessage) -> FilterOutcome;
}

/// Builds a chain from a rule's stored filter configuration.
pub trait FilterProvider: Send + Sync {
    fn chain_for(&self, filters: &RuleFilters) -> Arc<dyn FilterChain>;
}

/// Text substitution applied in order after the keyword checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub from: String,
    pub to: String,
}

/// Per-rule filter configuration as persisted with the rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleFilters {
    /// When non-empty, text must contain at least one of these keywords.
    pub whitelist: Vec<String>,
    /// Text containing any of these keywords is dropped.
    pub blacklist: Vec<String>,
    pub replacements: Vec<Replacement>,
}

impl RuleFilters {
    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty() && self.replacements.is_empty()
    }
}

/// Case-insensitive keyword allow/deny list followed by text replacements.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilterChain {
    whitelist: Vec<String>,
    blacklist: Vec<String>,
    replacements: Vec<Replacement>,
}

impl KeywordFilterChain {
    pub fn new(filters: &RuleFilters) -> Self {
        let lower = |words: &[String]| -> Vec<String> {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect()
        };
        Self {
            whitelist: lower(&filters.whitelist),
            blacklist: lower(&filters.blacklist),
            replacements: filters
                .replacements
                .iter()
                .filter(|r| !r.from.is_empty())
                .cloned()
                .collect(),
        }
    }
}

impl FilterChain for KeywordFilterChain {
    fn apply(&self, mut message: InboundMessage) -> FilterOutcome {
        let Some(text) = message.body() else {
            if !self.whitelist.is_empty() {
                return FilterOutcome::Drop("no text to match whitelist".into());
            }
            return FilterOutcome::Forward(message);
        };

        let haystack = text.to_lowercase();
        if !self.whitelist.is_empty() && !self.whitelist.iter().any(|w| haystack.contains(w)) {
            return FilterOutcome::Drop("no whitelisted keyword".into());
        }
        if let Some(word) = self.blacklist.iter().find(|w| haystack.contains(w.as_str())) {
            return FilterOutcome::Drop(format!("blacklisted keyword: {word}"));
        }

        if !self.replacements.is_empty() {
            let mut replaced = text.to_string();
            for r in &self.replacements {
                replaced = replaced.replace(&r.from, &r.to);
            }
            message.text = Some(replaced);
        }
        FilterOutcome::Forward(message)
    }
}

/// Provider that builds a [`KeywordFilterChain`] for every rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordFilterProvider;

impl FilterProvider for KeywordFilterProvider {
    fn chain_for(&self, filters: &RuleFilters) -> Arc<dyn FilterChain> {
        Arc::new(KeywordFilterChain::new(filters))
    }
}

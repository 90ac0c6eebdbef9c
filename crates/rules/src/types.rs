use std::collections::BTreeMap;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    telefeed_channels::{ConversationId, RuleFilters},
};

use crate::{Error, Result};

/// A named source-to-destination redirection owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Filled from the enclosing document key, not stored per record.
    #[serde(skip)]
    pub owner: String,
    pub name: String,
    /// Account whose session listens and sends.
    #[serde(rename = "phone")]
    pub account: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(rename = "sourceId")]
    pub source: ConversationId,
    #[serde(rename = "destinationId")]
    pub destination: ConversationId,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub filters: RuleFilters,
}

fn default_active() -> bool {
    true
}

/// Input for [`crate::RuleStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRule {
    pub name: String,
    pub account: String,
    pub channel_name: String,
    pub source: ConversationId,
    pub destination: ConversationId,
    pub filters: RuleFilters,
}

impl NewRule {
    pub fn new(
        name: impl Into<String>,
        account: impl Into<String>,
        source: impl Into<ConversationId>,
        destination: impl Into<ConversationId>,
    ) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
            channel_name: String::new(),
            source: source.into(),
            destination: destination.into(),
            filters: RuleFilters::default(),
        }
    }

    #[must_use]
    pub fn with_channel_name(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: RuleFilters) -> Self {
        self.filters = filters;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid("rule name is empty"));
        }
        if self.account.trim().is_empty() {
            return Err(Error::invalid("account is empty"));
        }
        self.source
            .validate()
            .map_err(|e| Error::invalid(format!("source: {e}")))?;
        self.destination
            .validate()
            .map_err(|e| Error::invalid(format!("destination: {e}")))?;
        if self.source == self.destination {
            return Err(Error::invalid("source and destination are the same"));
        }
        Ok(())
    }
}

/// Whole persisted rule set: owner id, then rule name, then rule.
///
/// Mutations operate on a copy held by the store and are committed only once
/// the backend accepted the new document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleDocument(BTreeMap<String, BTreeMap<String, Rule>>);

impl RuleDocument {
    /// Parse a stored document, stamping each rule with its owner.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let mut doc: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_json::from_str(raw)?
        };
        for (owner, rules) in &mut doc.0 {
            for (name, rule) in rules.iter_mut() {
                rule.owner = owner.clone();
                rule.name = name.clone();
            }
        }
        Ok(doc)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn get(&self, owner: &str, name: &str) -> Option<&Rule> {
        self.0.get(owner).and_then(|rules| rules.get(name))
    }

    pub fn list(&self, owner: &str) -> Vec<Rule> {
        self.0
            .get(owner)
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &Rule> {
        self.0.values().flat_map(|rules| rules.values())
    }

    pub fn add(&mut self, owner: &str, rule: NewRule, now: DateTime<Utc>) -> Result<Rule> {
        rule.validate()?;
        let rules = self.0.entry(owner.to_string()).or_default();
        if rules.contains_key(&rule.name) {
            return Err(Error::duplicate(owner, rule.name));
        }
        let created = Rule {
            owner: owner.to_string(),
            name: rule.name.clone(),
            account: rule.account,
            channel_name: rule.channel_name,
            source: rule.source,
            destination: rule.destination,
            created_at: now,
            active: true,
            filters: rule.filters,
        };
        rules.insert(rule.name, created.clone());
        Ok(created)
    }

    pub fn remove(&mut self, owner: &str, name: &str) -> bool {
        let Some(rules) = self.0.get_mut(owner) else {
            return false;
        };
        let removed = rules.remove(name).is_some();
        if rules.is_empty() {
            self.0.remove(owner);
        }
        removed
    }

    pub fn update(
        &mut self,
        owner: &str,
        name: &str,
        change: impl FnOnce(&mut Rule),
    ) -> Result<Rule> {
        let rule = self
            .0
            .get_mut(owner)
            .and_then(|rules| rules.get_mut(name))
            .ok_or_else(|| Error::not_found(owner, name))?;
        change(rule);
        Ok(rule.clone())
    }
}

use std::fmt;

use {
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Identity of an account session: the owning user and the account key
/// (phone number or bot handle) within that user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountKey {
    pub owner: String,
    pub account: String,
}

impl AccountKey {
    pub fn new(owner: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.owner, self.account)
    }
}

/// Lifecycle of an account session.
///
/// `Expired` is terminal until the account is registered again;
/// `Disconnected` can reconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Authorized,
    Expired,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authorized => "authorized",
            Self::Expired => "expired",
        })
    }
}

/// Persisted credentials for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub owner_id: String,
    pub account_key: String,
    /// Platform credential (bot token or session string).
    #[serde(serialize_with = "serialize_secret")]
    pub credential_handle: Secret<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_used_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl SessionRecord {
    pub fn new(key: &AccountKey, credential: Secret<String>) -> Self {
        let now = Utc::now();
        Self {
            owner_id: key.owner.clone(),
            account_key: key.account.clone(),
            credential_handle: credential,
            active: true,
            created_at: now,
            last_used_at: now,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(&self.owner_id, &self.account_key)
    }
}

/// Snapshot of one session for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub key: AccountKey,
    pub status: SessionStatus,
    pub active: bool,
    pub display_name: Option<String>,
    pub last_used_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};

use tollgate_core::TenantId;

/// The kind of state being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Wallet node state (limits, spent, reserved).
    Wallet,
    /// Rate limit window counter.
    RateLimit,
    /// Generic counter.
    Counter,
    /// Distributed lock marker.
    Lock,
    Custom(String),
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Wallet => "wallet",
            Self::RateLimit => "rate_limit",
            Self::Counter => "counter",
            Self::Lock => "lock",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to address state entries in the store. Every key carries the
/// owning tenant so backends can enforce isolation at the key level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub tenant: TenantId,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(tenant: impl Into<TenantId>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            kind,
            id: id.into(),
        }
    }

    /// Return a canonical string representation: `tenant:kind:id`
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.tenant, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

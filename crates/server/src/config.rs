use std::path::Path;

use serde::{Deserialize, Serialize};

use tollgate_core::{ConnectorConfig, RoutingRule, Tenant};
use tollgate_policy::{ScanPolicy, StaticPolicyRule};

/// One API key entry. The configuration stores only the SHA-256 hash of
/// the raw key; raw keys never appear on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// Actor this key authenticates as.
    pub actor: String,
    /// Lowercase hex SHA-256 of the raw key.
    pub key_hash: String,
    /// Tenant the actor belongs to.
    pub tenant: String,
    /// The actor's leaf wallet.
    pub wallet: String,
    /// Team for routing-rule conditions.
    #[serde(default)]
    pub team: Option<String>,
    /// Additional tenants a service account may act for via the
    /// organization override header.
    #[serde(default)]
    pub allowed_tenants: Vec<String>,
}

/// One rate-limit tier: requests per sliding window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub requests_per_window: u64,
    pub window_seconds: u64,
}

impl Default for RateLimitTier {
    fn default() -> Self {
        Self {
            requests_per_window: 600,
            window_seconds: 60,
        }
    }
}

/// Per-tenant and per-actor rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub tenant: RateLimitTier,
    pub actor: RateLimitTier,
    /// Tenant-specific overrides.
    pub tenant_overrides: std::collections::HashMap<String, RateLimitTier>,
}

/// Seed definition for a wallet node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletSeed {
    pub id: String,
    pub tenant: String,
    #[serde(default)]
    pub parent: Option<String>,
    pub kind: tollgate_wallet::WalletKind,
    pub hard_limit: u64,
    #[serde(default)]
    pub overdraft: u64,
    #[serde(default)]
    pub soft_thresholds: Vec<u8>,
}

/// Semantic cache wiring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Embeddings endpoint (OpenAI wire shape).
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Secret reference for the embeddings API key.
    pub key_ref: Option<String>,
}

/// Top-level server configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    pub listen: String,
    /// Default request deadline in seconds when the client sends none.
    pub default_timeout_seconds: u64,
    pub auth: Vec<ApiKeyConfig>,
    pub rate_limit: RateLimitConfig,
    pub connectors: Vec<ConnectorConfig>,
    pub tenants: Vec<Tenant>,
    pub wallets: Vec<WalletSeed>,
    pub rules: Vec<RoutingRule>,
    pub scan_policy: ScanPolicy,
    pub policy_rules: Vec<StaticPolicyRule>,
    /// Whether policy evaluator failures let requests proceed.
    pub policy_fail_open: bool,
    pub cache: CacheConfig,
    /// Bound on the analytics queue in front of the external sink.
    pub analytics_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            default_timeout_seconds: 120,
            auth: Vec::new(),
            rate_limit: RateLimitConfig::default(),
            connectors: Vec::new(),
            tenants: Vec::new(),
            wallets: Vec::new(),
            rules: Vec::new(),
            scan_policy: ScanPolicy::default(),
            policy_rules: Vec::new(),
            policy_fail_open: false,
            cache: CacheConfig::default(),
            analytics_buffer: 4_096,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("reading {}: {e}", path.as_ref().display()))?;
        toml::from_str(&raw).map_err(|e| format!("parsing {}: {e}", path.as_ref().display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert_eq!(config.default_timeout_seconds, 120);
        assert!(!config.policy_fail_open);
    }

    #[test]
    fn parses_minimal_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9000"

            [[auth]]
            actor = "u1"
            key_hash = "deadbeef"
            tenant = "t1"
            wallet = "w1"
            team = "growth"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.auth.len(), 1);
        assert_eq!(config.auth[0].team.as_deref(), Some("growth"));
    }

    #[test]
    fn rejects_unknown_auth_fields() {
        let result = toml::from_str::<ServerConfig>(
            r#"
            [[auth]]
            actor = "u1"
            key_hash = "deadbeef"
            tenant = "t1"
            wallet = "w1"
            raw_key = "oops"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn parses_wallet_seeds_and_rules() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[wallets]]
            id = "org"
            tenant = "t1"
            kind = "organization"
            hard_limit = 1000000

            [[wallets]]
            id = "team-growth"
            tenant = "t1"
            parent = "org"
            kind = "team"
            hard_limit = 100000
            soft_thresholds = [80, 90, 95]

            [[rules]]
            id = "downgrade-hot"
            priority = 10
            condition = { kind = "wallet_utilization", at_least_percent = 80 }
            action = { kind = "reroute_to_model", model = "gpt-4o-mini" }
            "#,
        )
        .unwrap();
        assert_eq!(config.wallets.len(), 2);
        assert_eq!(config.wallets[1].soft_thresholds, vec![80, 90, 95]);
        assert_eq!(config.rules.len(), 1);
    }
}

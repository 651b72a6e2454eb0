use serde::{Deserialize, Serialize};

use crate::types::TenantId;

/// Commercial plan tier a tenant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    #[default]
    Standard,
    Enterprise,
}

/// Per-tenant semantic cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CacheSettings {
    /// Whether the cache may be used at all for this tenant.
    #[serde(default)]
    pub enabled: bool,
    /// Minimum cosine similarity for a cache hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Default entry TTL in seconds.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries for this tenant.
    #[serde(default = "default_cache_budget")]
    pub max_entries: u64,
}

fn default_similarity_threshold() -> f32 {
    0.97
}

fn default_cache_ttl() -> u64 {
    3_600
}

fn default_cache_budget() -> u64 {
    10_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: default_similarity_threshold(),
            ttl_seconds: default_cache_ttl(),
            max_entries: default_cache_budget(),
        }
    }
}

/// The top-level isolation boundary. Every other entity is owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Tenant {
    pub id: TenantId,
    #[serde(default)]
    pub plan: PlanTier,
    /// Data-residency region requirement (e.g. `eu`, `us`). Empty means any.
    #[serde(default)]
    pub residency_regions: Vec<String>,
    /// Name of the default policy set applied to this tenant's requests.
    #[serde(default)]
    pub default_policy_set: Option<String>,
    /// Reference to the tenant's encryption key in the secret store.
    #[serde(default)]
    pub encryption_key_ref: Option<String>,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Tenant {
    /// Create a tenant with default settings.
    #[must_use]
    pub fn new(id: impl Into<TenantId>) -> Self {
        Self {
            id: id.into(),
            plan: PlanTier::default(),
            residency_regions: Vec::new(),
            default_policy_set: None,
            encryption_key_ref: None,
            cache: CacheSettings::default(),
        }
    }

    /// Whether a connector serving the given regions satisfies this tenant's
    /// residency requirement.
    #[must_use]
    pub fn residency_allows(&self, connector_regions: &[String]) -> bool {
        if self.residency_regions.is_empty() {
            return true;
        }
        connector_regions
            .iter()
            .any(|r| self.residency_regions.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residency_empty_allows_all() {
        let t = Tenant::new("t1");
        assert!(t.residency_allows(&["us".into()]));
        assert!(t.residency_allows(&[]));
    }

    #[test]
    fn residency_requires_intersection() {
        let mut t = Tenant::new("t1");
        t.residency_regions = vec!["eu".into()];
        assert!(t.residency_allows(&["eu".into(), "us".into()]));
        assert!(!t.residency_allows(&["us".into()]));
    }

    #[test]
    fn cache_defaults() {
        let settings = CacheSettings::default();
        assert!(!settings.enabled);
        assert!((settings.similarity_threshold - 0.97).abs() < f32::EPSILON);
        assert_eq!(settings.ttl_seconds, 3_600);
    }

    #[test]
    fn tenant_serde_with_defaults() {
        let json = r#"{"id":"acme"}"#;
        let t: Tenant = serde_json::from_str(json).unwrap();
        assert_eq!(t.id.as_str(), "acme");
        assert_eq!(t.plan, PlanTier::Standard);
        assert!(!t.cache.enabled);
    }
}

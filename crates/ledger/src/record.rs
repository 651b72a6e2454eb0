use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tollgate_core::{ActorId, ConnectorId, CorrelationId, TenantId};

/// Content of a ledger record before the writer assigns its place in the
/// chain. Everything the audit needs to reconstruct what happened to one
/// request, minus the chain fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerDraft {
    pub tenant: TenantId,
    pub correlation_id: CorrelationId,
    pub actor: ActorId,
    #[serde(default)]
    pub feature: Option<String>,
    pub model_requested: String,
    pub model_used: String,
    pub provider: ConnectorId,
    /// Machine-readable tag for why the router selected this pair.
    pub routing_reason: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Committed cost in micro-units.
    pub cost: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default)]
    pub cache_similarity: Option<f32>,
    /// Policy actions applied (e.g. `redact:email`, `reroute:self-hosted`).
    #[serde(default)]
    pub policy_actions: Vec<String>,
    /// Terminal stream state for streaming requests.
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Error code when the request failed.
    #[serde(default)]
    pub error_code: Option<String>,
    /// Failover hops taken before the serving connector.
    #[serde(default)]
    pub failover_count: u32,
    pub recorded_at: DateTime<Utc>,
}

/// A sealed, hash-chained ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerRecord {
    /// Record identifier (UUID v7).
    pub id: String,
    /// Monotonic, gapless sequence within the tenant.
    pub sequence: u64,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub tenant: TenantId,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub correlation_id: CorrelationId,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub actor: ActorId,
    #[serde(default)]
    pub feature: Option<String>,
    pub model_requested: String,
    pub model_used: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String))]
    pub provider: ConnectorId,
    pub routing_reason: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    #[serde(default)]
    pub cache_similarity: Option<f32>,
    #[serde(default)]
    pub policy_actions: Vec<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub failover_count: u32,
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous record in this tenant's chain; all-zero for the
    /// first record.
    pub prev_hash: String,
    /// `SHA-256` hex digest over the previous hash and this record's content.
    pub record_hash: String,
}

/// The previous-hash value for the first record of a chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

impl LedgerRecord {
    /// Seal a draft into a record at the given chain position.
    #[must_use]
    pub fn seal(draft: LedgerDraft, sequence: u64, prev_hash: &str) -> Self {
        let mut record = Self {
            id: uuid::Uuid::now_v7().to_string(),
            sequence,
            tenant: draft.tenant,
            correlation_id: draft.correlation_id,
            actor: draft.actor,
            feature: draft.feature,
            model_requested: draft.model_requested,
            model_used: draft.model_used,
            provider: draft.provider,
            routing_reason: draft.routing_reason,
            input_tokens: draft.input_tokens,
            output_tokens: draft.output_tokens,
            cost: draft.cost,
            latency_ms: draft.latency_ms,
            cache_hit: draft.cache_hit,
            cache_similarity: draft.cache_similarity,
            policy_actions: draft.policy_actions,
            finish_reason: draft.finish_reason,
            error_code: draft.error_code,
            failover_count: draft.failover_count,
            recorded_at: draft.recorded_at,
            prev_hash: prev_hash.to_owned(),
            record_hash: String::new(),
        };
        record.record_hash = record.compute_hash();
        record
    }

    /// Hash over the previous hash and the record's content fields, in a
    /// fixed order. Verification recomputes this and compares.
    #[must_use]
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        for (field, value) in [
            ("sequence", self.sequence.to_string()),
            ("tenant", self.tenant.to_string()),
            ("correlation_id", self.correlation_id.to_string()),
            ("actor", self.actor.to_string()),
            ("feature", self.feature.clone().unwrap_or_default()),
            ("model_requested", self.model_requested.clone()),
            ("model_used", self.model_used.clone()),
            ("provider", self.provider.to_string()),
            ("routing_reason", self.routing_reason.clone()),
            ("input_tokens", self.input_tokens.to_string()),
            ("output_tokens", self.output_tokens.to_string()),
            ("cost", self.cost.to_string()),
            ("cache_hit", self.cache_hit.to_string()),
            ("finish_reason", self.finish_reason.clone().unwrap_or_default()),
            ("error_code", self.error_code.clone().unwrap_or_default()),
            ("recorded_at", self.recorded_at.to_rfc3339()),
        ] {
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

/// Query parameters for searching ledger records.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerQuery {
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>))]
    pub tenant: Option<TenantId>,
    pub actor: Option<String>,
    pub feature: Option<String>,
    pub model_used: Option<String>,
    pub provider: Option<String>,
    pub correlation_id: Option<String>,
    /// Only records at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only records at or before this time.
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of records to return (default 50, max 1000).
    pub limit: Option<u32>,
    /// Number of records to skip for pagination.
    pub offset: Option<u32>,
}

impl LedgerQuery {
    /// Return the effective limit, clamped to 1..=1000, defaulting to 50.
    #[must_use]
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(50).clamp(1, 1000)
    }

    /// Return the effective offset, defaulting to 0.
    #[must_use]
    pub fn effective_offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }
}

/// A paginated page of ledger records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LedgerPage {
    pub records: Vec<LedgerRecord>,
    /// Total matching records before pagination.
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

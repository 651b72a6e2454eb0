use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::RoutingStrategy;
use crate::types::{ActorId, CorrelationId, TenantId, WalletId};

/// Request priority, resolved from the client header or the actor's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Ephemeral per-request context built at ingress and threaded through the
/// middleware chain. Discarded after the response settles.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub tenant: TenantId,
    pub actor: ActorId,
    /// Wallet charged for this request (the actor's leaf wallet).
    pub wallet: WalletId,
    /// Team the actor belongs to, if any.
    pub team: Option<String>,
    /// Model alias the client requested.
    pub requested_model: String,
    /// Conservative pre-dispatch input token estimate.
    pub estimated_input_tokens: u64,
    /// Routing strategy hint from the extension object or tenant default.
    pub strategy: RoutingStrategy,
    /// Feature tag for cost attribution.
    pub feature: Option<String>,
    pub priority: Priority,
    /// Explicit data classification set by the caller.
    pub data_classification: Option<String>,
    pub arrived_at: DateTime<Utc>,
}

impl RequestContext {
    /// Build a context for the given identity and model. Generates a fresh
    /// correlation id; callers that received one from the client overwrite it.
    #[must_use]
    pub fn new(
        tenant: impl Into<TenantId>,
        actor: impl Into<ActorId>,
        wallet: impl Into<WalletId>,
        requested_model: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            tenant: tenant.into(),
            actor: actor.into(),
            wallet: wallet.into(),
            team: None,
            requested_model: requested_model.into(),
            estimated_input_tokens: 0,
            strategy: RoutingStrategy::default(),
            feature: None,
            priority: Priority::default(),
            data_classification: None,
            arrived_at: Utc::now(),
        }
    }

    /// Set the correlation id (taken from an inbound header).
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Set the actor's team.
    #[must_use]
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Set the estimated input token count.
    #[must_use]
    pub fn with_estimated_input_tokens(mut self, tokens: u64) -> Self {
        self.estimated_input_tokens = tokens;
        self
    }

    /// Set the feature tag.
    #[must_use]
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Set the routing strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the data classification.
    #[must_use]
    pub fn with_data_classification(mut self, classification: impl Into<String>) -> Self {
        self.data_classification = Some(classification.into());
        self
    }
}

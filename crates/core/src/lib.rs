pub mod chat;
pub mod connector;
pub mod context;
pub mod error;
pub mod rule;
pub mod stream;
pub mod tenant;
pub mod types;

pub use chat::{
    ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    GatewayOptions, ResponseAugmentation, RoutingStrategy, Usage,
};
pub use connector::{
    ConnectorConfig, ConnectorKind, HealthState, ModelCapabilities, ModelSpec, RateBudget,
};
pub use context::{Priority, RequestContext};
pub use error::{ErrorCode, GatewayError};
pub use rule::{ExperimentSplit, RoutingRule, RuleAction, RuleCondition, RuleDecision};
pub use stream::{FinishReason, StreamAccounting};
pub use tenant::{CacheSettings, PlanTier, Tenant};
pub use types::{ActorId, ConnectorId, CorrelationId, TenantId, WalletId};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ConnectorId;

/// Provider family a connector speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    OpenAi,
    Anthropic,
    /// Self-hosted endpoint speaking the OpenAI wire protocol.
    OpenAiCompatible,
}

/// Capabilities a model advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ModelCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub vision: bool,
}

/// Per-model pricing and limits advertised by a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ModelSpec {
    /// Price per 1 000 input tokens, in micro-units.
    pub input_price: u64,
    /// Price per 1 000 output tokens, in micro-units.
    pub output_price: u64,
    /// Context window in tokens.
    pub context_window: u64,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

/// Request and token throughput budget for a connector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RateBudget {
    /// Requests per minute.
    pub requests_per_minute: u64,
    /// Tokens per minute.
    pub tokens_per_minute: u64,
}

impl Default for RateBudget {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            tokens_per_minute: 1_000_000,
        }
    }
}

/// Health of an upstream connector as tracked by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Down,
}

impl HealthState {
    /// Whether the router may dispatch to a connector in this state.
    #[must_use]
    pub fn dispatchable(self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Degraded => f.write_str("degraded"),
            Self::Down => f.write_str("down"),
        }
    }
}

/// Static configuration for one upstream connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConnectorConfig {
    pub id: ConnectorId,
    pub kind: ConnectorKind,
    /// Base endpoint, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Secret-store reference for the API key (`env:NAME`, `file:PATH`).
    /// The raw key never appears in configuration.
    pub key_ref: String,
    /// Model aliases this connector serves.
    pub models: HashMap<String, ModelSpec>,
    /// Lower value = preferred under the priority strategy.
    #[serde(default)]
    pub priority: u32,
    /// Regions this connector serves from.
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub rate_budget: RateBudget,
    /// Upstream response timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl ConnectorConfig {
    /// Look up the spec for a model alias.
    #[must_use]
    pub fn model(&self, alias: &str) -> Option<&ModelSpec> {
        self.models.get(alias)
    }

    /// Whether this connector serves the model with the required capabilities.
    #[must_use]
    pub fn supports(&self, alias: &str, needs_streaming: bool) -> bool {
        self.models
            .get(alias)
            .is_some_and(|spec| !needs_streaming || spec.capabilities.streaming)
    }
}

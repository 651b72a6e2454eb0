use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Routing strategy hint a client may attach to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Order candidates by configured priority (healthy before degraded).
    #[default]
    Priority,
    /// Order candidates by per-unit price, ties broken by recent p95 latency.
    CostOptimized,
    /// Order candidates by recent p95 latency.
    LatencyOptimized,
}

/// Optional gateway extension object carried in the request body.
///
/// All fields are optional; unknown fields inside this object are rejected
/// so that client typos surface instead of being silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(deny_unknown_fields)]
pub struct GatewayOptions {
    /// Routing strategy override for this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RoutingStrategy>,
    /// Models to try, in order, if the resolved model has no healthy connector.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_models: Vec<String>,
    /// Enable the semantic cache for this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    /// Cache TTL override in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_seconds: Option<u64>,
    /// Feature tag for cost attribution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Budget group (wallet) override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_group: Option<String>,
    /// Evaluate routing and policy without dispatching upstream.
    #[serde(default)]
    pub dry_run: bool,
    /// Explicit data classification set by the caller (e.g. `restricted`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_classification: Option<String>,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatMessage {
    /// Message role: `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with the given role and content.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// An OpenAI-compatible chat completion request.
///
/// Fields the gateway does not interpret are preserved in `passthrough` so
/// the upstream payload stays byte-equivalent for SDK compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatRequest {
    /// Requested model alias.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<ChatMessage>,
    /// When true, the response is streamed as SSE.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Output token cap, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Gateway extension object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tollgate: Option<GatewayOptions>,
    /// Unrecognized provider fields, forwarded untouched.
    #[serde(flatten)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub passthrough: HashMap<String, serde_json::Value>,
}

impl ChatRequest {
    /// Create a minimal request for the given model and messages.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
            max_tokens: None,
            tollgate: None,
            passthrough: HashMap::new(),
        }
    }

    /// Concatenated content of every message, used for scanning and embedding.
    #[must_use]
    pub fn joined_content(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token usage reported by (or estimated for) an upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Build usage from prompt/completion counts.
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One completion choice in a non-streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// An OpenAI-compatible chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatResponse {
    pub id: String,
    #[serde(default = "chat_completion_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Gateway response augmentation, mirrored into `x-tollgate-*` headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tollgate: Option<ResponseAugmentation>,
}

fn chat_completion_object() -> String {
    "chat.completion".to_owned()
}

/// Delta payload inside a streaming chunk choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One choice inside a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A single streaming delta event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatChunk {
    pub id: String,
    #[serde(default = "chat_chunk_object")]
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    /// Authoritative usage, sent by some providers on the final event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn chat_chunk_object() -> String {
    "chat.completion.chunk".to_owned()
}

impl ChatChunk {
    /// Content carried by this chunk, if any.
    ///
    /// Keepalives and end markers carry no content and contribute nothing
    /// to the streaming token estimate.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Gateway metadata attached to every response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResponseAugmentation {
    /// Correlation id for cross-referencing the ledger.
    pub request_id: String,
    /// Connector that served (or last attempted) the request.
    pub provider_used: String,
    /// Model alias the client asked for.
    pub model_requested: String,
    /// Model actually dispatched.
    pub model_used: String,
    /// Machine-readable tag for why the router chose this pair.
    pub routing_reason: String,
    /// Computed cost in micro-units.
    pub cost: u64,
    /// Whether the response was served from the semantic cache.
    pub cache_hit: bool,
    /// Similarity score when served from cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_similarity: Option<f32>,
    /// Remaining balance of the effective wallet after settlement.
    pub wallet_balance: u64,
    /// Policy actions applied to this request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_actions: Vec<String>,
}

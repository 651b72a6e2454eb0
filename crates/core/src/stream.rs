use serde::{Deserialize, Serialize};

/// Why a streaming response terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Upstream completed the response normally.
    Stop,
    /// Client disconnected before the stream finished.
    ClientDisconnect,
    /// Upstream failed mid-stream.
    Error,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::ClientDisconnect => f.write_str("client_disconnect"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Per-stream bookkeeping, created when streaming begins and finalized at
/// completion or client disconnect. The token estimate bills partial
/// streams; an authoritative usage event from the provider replaces it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StreamAccounting {
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    /// Running conservative output-token estimate.
    pub tokens_estimated: u64,
    pub client_disconnected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamAccounting {
    /// Record one forwarded chunk.
    pub fn record_chunk(&mut self, bytes: u64, token_estimate: u64) {
        self.chunks_sent += 1;
        self.bytes_sent += bytes;
        self.tokens_estimated += token_estimate;
    }

    /// Finalize the record with the terminal reason.
    pub fn finalize(&mut self, reason: FinishReason) {
        self.client_disconnected = reason == FinishReason::ClientDisconnect;
        self.finish_reason = Some(reason);
    }
}

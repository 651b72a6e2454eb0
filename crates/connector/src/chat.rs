use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use tollgate_core::{ChatChunk, ChatRequest, ChatResponse, ConnectorConfig, ConnectorId};

use crate::error::ConnectorError;

/// One item from an upstream streaming response.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A delta event, possibly content-free (role announcements, usage).
    Chunk(ChatChunk),
    /// Upstream signalled normal end of stream.
    Done,
}

/// A boxed upstream chunk stream. Yields `Err` on mid-stream failure;
/// dropping the stream closes the upstream connection.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamItem, ConnectorError>> + Send>>;

/// What a dispatch produced.
pub enum ChatOutcome {
    /// Non-streaming: the full response.
    Complete(ChatResponse),
    /// Streaming: a chunk producer.
    Stream(ChunkStream),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(r) => f.debug_tuple("Complete").field(&r.id).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Uniform dispatch contract over one upstream provider.
///
/// Implementations normalize their provider's wire protocol to the
/// OpenAI-compatible types in `tollgate-core`; the rest of the gateway
/// never sees provider-specific shapes.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// This connector's identifier.
    fn id(&self) -> &ConnectorId;

    /// The connector's static configuration.
    fn config(&self) -> &ConnectorConfig;

    /// Dispatch a chat completion with the given remaining deadline.
    ///
    /// Honors `request.stream`: a streaming request yields
    /// [`ChatOutcome::Stream`], anything else [`ChatOutcome::Complete`].
    async fn chat(
        &self,
        request: &ChatRequest,
        deadline: Duration,
    ) -> Result<ChatOutcome, ConnectorError>;

    /// Health probe. A cheap upstream round-trip; errors feed the health
    /// state machine.
    async fn probe(&self) -> Result<(), ConnectorError>;
}

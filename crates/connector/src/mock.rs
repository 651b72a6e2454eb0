use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tollgate_core::{
    ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    ConnectorConfig, ConnectorId, ConnectorKind, ModelCapabilities, ModelSpec, RateBudget, Usage,
};

use crate::chat::{ChatConnector, ChatOutcome, StreamItem};
use crate::error::ConnectorError;

/// A scripted upstream failure. Mirrors the [`ConnectorError`] variants the
/// failover loop reacts to; kept separate because errors are not `Clone`.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedFailure {
    RateLimited,
    Server(u16),
    Timeout,
    Network,
}

impl ScriptedFailure {
    fn into_error(self) -> ConnectorError {
        match self {
            Self::RateLimited => ConnectorError::RateLimited { retry_after: Some(1) },
            Self::Server(status) => ConnectorError::Server {
                status,
                message: "scripted failure".into(),
            },
            Self::Timeout => ConnectorError::Timeout,
            Self::Network => ConnectorError::Network("scripted failure".into()),
        }
    }
}

/// One scripted response from the mock.
#[derive(Debug, Clone)]
pub enum ScriptedCall {
    /// Return this response.
    Complete(ChatResponse),
    /// Stream these chunks; fail mid-stream instead of finishing when set.
    Stream {
        chunks: Vec<ChatChunk>,
        fail_mid_stream: bool,
    },
    /// Fail the call before any byte is produced.
    Fail(ScriptedFailure),
}

/// Scriptable connector for gateway and server tests.
///
/// Calls pop scripted outcomes in order; when the script runs dry the mock
/// echoes a fixed completion. Requests are recorded so tests can assert on
/// what actually reached the upstream.
pub struct MockConnector {
    config: ConnectorConfig,
    script: Mutex<VecDeque<ScriptedCall>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    probe_failures: AtomicUsize,
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("id", &self.config.id)
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn default_spec() -> ModelSpec {
    ModelSpec {
        input_price: 2_500,
        output_price: 10_000,
        context_window: 128_000,
        capabilities: ModelCapabilities {
            streaming: true,
            function_calling: true,
            vision: false,
        },
    }
}

impl MockConnector {
    /// Create a mock serving `gpt-4o` and `gpt-4o-mini` from region `us`.
    #[must_use]
    pub fn new(id: &str) -> Self {
        let mut models = HashMap::new();
        models.insert("gpt-4o".to_owned(), default_spec());
        models.insert(
            "gpt-4o-mini".to_owned(),
            ModelSpec {
                input_price: 150,
                output_price: 600,
                ..default_spec()
            },
        );
        Self {
            config: ConnectorConfig {
                id: ConnectorId::new(id),
                kind: ConnectorKind::OpenAiCompatible,
                base_url: format!("http://{id}.mock/v1"),
                key_ref: format!("test:{id}"),
                models,
                priority: 0,
                regions: vec!["us".to_owned()],
                rate_budget: RateBudget::default(),
                timeout_seconds: 120,
            },
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            probe_failures: AtomicUsize::new(0),
        }
    }

    /// Override the connector priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.config.priority = priority;
        self
    }

    /// Override the served regions.
    #[must_use]
    pub fn with_regions(mut self, regions: Vec<String>) -> Self {
        self.config.regions = regions;
        self
    }

    /// Queue a scripted outcome.
    pub fn push(&self, call: ScriptedCall) {
        self.script.lock().push_back(call);
    }

    /// Number of chat calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Requests received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    /// Make the next `n` probes fail.
    pub fn fail_probes(&self, n: usize) {
        self.probe_failures.store(n, Ordering::Relaxed);
    }

    /// A canned completion response.
    #[must_use]
    pub fn response(model: &str, text: &str, usage: Usage) -> ChatResponse {
        ChatResponse {
            id: "chatcmpl-mock".to_owned(),
            object: "chat.completion".to_owned(),
            created: 1_700_000_000,
            model: model.to_owned(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new("assistant", text),
                finish_reason: Some("stop".to_owned()),
            }],
            usage: Some(usage),
            tollgate: None,
        }
    }

    /// Content chunks followed by a finish chunk carrying usage.
    #[must_use]
    pub fn chunks(model: &str, pieces: &[&str], usage: Option<Usage>) -> Vec<ChatChunk> {
        let mut chunks: Vec<ChatChunk> = pieces
            .iter()
            .map(|piece| ChatChunk {
                id: "chatcmpl-mock".to_owned(),
                object: "chat.completion.chunk".to_owned(),
                created: 1_700_000_000,
                model: model.to_owned(),
                choices: vec![ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        role: None,
                        content: Some((*piece).to_owned()),
                    },
                    finish_reason: None,
                }],
                usage: None,
            })
            .collect();
        chunks.push(ChatChunk {
            id: "chatcmpl-mock".to_owned(),
            object: "chat.completion.chunk".to_owned(),
            created: 1_700_000_000,
            model: model.to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta::default(),
                finish_reason: Some("stop".to_owned()),
            }],
            usage,
        });
        chunks
    }
}

#[async_trait]
impl ChatConnector for MockConnector {
    fn id(&self) -> &ConnectorId {
        &self.config.id
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        _deadline: Duration,
    ) -> Result<ChatOutcome, ConnectorError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let scripted = self.script.lock().pop_front();
        match scripted {
            None => Ok(ChatOutcome::Complete(Self::response(
                &request.model,
                "mock response",
                Usage::new(10, 5),
            ))),
            Some(ScriptedCall::Complete(response)) => Ok(ChatOutcome::Complete(response)),
            Some(ScriptedCall::Fail(failure)) => Err(failure.into_error()),
            Some(ScriptedCall::Stream {
                chunks,
                fail_mid_stream,
            }) => {
                let mut items: Vec<Result<StreamItem, ConnectorError>> =
                    chunks.into_iter().map(|c| Ok(StreamItem::Chunk(c))).collect();
                if fail_mid_stream {
                    items.push(Err(ConnectorError::Server {
                        status: 502,
                        message: "scripted mid-stream failure".into(),
                    }));
                } else {
                    items.push(Ok(StreamItem::Done));
                }
                Ok(ChatOutcome::Stream(Box::pin(futures::stream::iter(items))))
            }
        }
    }

    async fn probe(&self) -> Result<(), ConnectorError> {
        let remaining = self.probe_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(ConnectorError::Network("scripted probe failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest::new("gpt-4o", vec![ChatMessage::new("user", "hi")])
    }

    #[tokio::test]
    async fn default_echo_when_script_empty() {
        let mock = MockConnector::new("m");
        let outcome = mock.chat(&request(), Duration::from_secs(1)).await.unwrap();
        assert!(matches!(outcome, ChatOutcome::Complete(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failure_pops_in_order() {
        let mock = MockConnector::new("m");
        mock.push(ScriptedCall::Fail(ScriptedFailure::RateLimited));
        mock.push(ScriptedCall::Complete(MockConnector::response(
            "gpt-4o",
            "after retry",
            Usage::new(1, 1),
        )));

        assert!(matches!(
            mock.chat(&request(), Duration::from_secs(1)).await,
            Err(ConnectorError::RateLimited { .. })
        ));
        assert!(mock.chat(&request(), Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_stream_yields_chunks() {
        let mock = MockConnector::new("m");
        mock.push(ScriptedCall::Stream {
            chunks: MockConnector::chunks("gpt-4o", &["a", "b"], Some(Usage::new(5, 2))),
            fail_mid_stream: false,
        });

        let outcome = mock.chat(&request(), Duration::from_secs(1)).await.unwrap();
        let ChatOutcome::Stream(mut stream) = outcome else {
            panic!("expected stream");
        };
        let mut contents = Vec::new();
        while let Some(item) = stream.next().await {
            match item.unwrap() {
                StreamItem::Chunk(chunk) => {
                    if let Some(content) = chunk.content() {
                        contents.push(content.to_owned());
                    }
                }
                StreamItem::Done => break,
            }
        }
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockConnector::new("m");
        mock.chat(&request(), Duration::from_secs(1)).await.unwrap();
        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "gpt-4o");
    }

    #[tokio::test]
    async fn probe_failures_decrement() {
        let mock = MockConnector::new("m");
        mock.fail_probes(2);
        assert!(mock.probe().await.is_err());
        assert!(mock.probe().await.is_err());
        assert!(mock.probe().await.is_ok());
    }
}

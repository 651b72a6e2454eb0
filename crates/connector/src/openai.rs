use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::ExposeSecret;
use tracing::debug;

use tollgate_core::{ChatChunk, ChatRequest, ChatResponse, ConnectorConfig, ConnectorId};

use crate::chat::{ChatConnector, ChatOutcome, ChunkStream, StreamItem};
use crate::error::ConnectorError;
use crate::secret::SecretStore;
use crate::sse::{SseDecoder, DONE_MARKER};

/// Connector for the OpenAI family and self-hosted OpenAI-compatible
/// endpoints. The wire protocol passes through nearly verbatim; only the
/// gateway extension object is stripped before dispatch.
pub struct OpenAiConnector {
    config: ConnectorConfig,
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for OpenAiConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConnector")
            .field("id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiConnector {
    /// Create a connector. The API key is resolved per call, never cached
    /// beyond the secret store's own policy.
    pub fn new(
        config: ConnectorConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ConnectorError::Network(e.to_string()))?;
        Ok(Self {
            config,
            client,
            secrets,
        })
    }

    /// Upstream request body: the client payload minus gateway extensions,
    /// with the resolved model substituted.
    pub(crate) fn upstream_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::to_value(request).unwrap_or_default();
        if let Some(map) = body.as_object_mut() {
            map.remove("tollgate");
        }
        body
    }

    async fn bearer(&self) -> Result<String, ConnectorError> {
        let key = self.secrets.resolve(&self.config.key_ref).await?;
        Ok(format!("Bearer {}", key.expose_secret()))
    }

    async fn error_for(response: reqwest::Response) -> ConnectorError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let message = response.text().await.unwrap_or_default();
        ConnectorError::from_status(status, message, retry_after)
    }
}

/// Wrap an upstream SSE byte stream into a [`ChunkStream`].
pub(crate) fn decode_openai_stream(
    bytes: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> ChunkStream {
    let stream = futures::stream::unfold(
        (Box::pin(bytes), SseDecoder::new(), false),
        |(mut bytes, mut decoder, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(event) = decoder.next_event() {
                    if event.data == DONE_MARKER {
                        return Some((Ok(StreamItem::Done), (bytes, decoder, true)));
                    }
                    match serde_json::from_str::<ChatChunk>(&event.data) {
                        Ok(chunk) => {
                            return Some((Ok(StreamItem::Chunk(chunk)), (bytes, decoder, false)));
                        }
                        Err(e) => {
                            return Some((
                                Err(ConnectorError::Protocol(format!(
                                    "undecodable stream event: {e}"
                                ))),
                                (bytes, decoder, true),
                            ));
                        }
                    }
                }
                match bytes.next().await {
                    Some(Ok(buf)) => decoder.push(&buf),
                    Some(Err(e)) => {
                        return Some((
                            Err(ConnectorError::from_transport(&e)),
                            (bytes, decoder, true),
                        ));
                    }
                    // Body ended without a DONE marker: treat as done so
                    // partial streams still settle.
                    None => return Some((Ok(StreamItem::Done), (bytes, decoder, true))),
                }
            }
        },
    );
    Box::pin(stream)
}

#[async_trait]
impl ChatConnector for OpenAiConnector {
    fn id(&self) -> &ConnectorId {
        &self.config.id
    }

    fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    async fn chat(
        &self,
        request: &ChatRequest,
        deadline: Duration,
    ) -> Result<ChatOutcome, ConnectorError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = Self::upstream_body(request);
        debug!(connector = %self.config.id, model = %request.model, stream = request.stream,
            "dispatching upstream");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        if request.stream {
            Ok(ChatOutcome::Stream(decode_openai_stream(
                response.bytes_stream(),
            )))
        } else {
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| ConnectorError::Protocol(e.to_string()))?;
            Ok(ChatOutcome::Complete(parsed))
        }
    }

    async fn probe(&self) -> Result<(), ConnectorError> {
        let url = format!("{}/models", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_for(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use tollgate_core::{ChatMessage, GatewayOptions};

    use super::*;

    #[test]
    fn upstream_body_strips_gateway_extension() {
        let mut request = ChatRequest::new("gpt-4o", vec![ChatMessage::new("user", "hi")]);
        request.tollgate = Some(GatewayOptions {
            feature: Some("search".into()),
            ..Default::default()
        });
        request
            .passthrough
            .insert("top_p".into(), serde_json::json!(0.9));

        let body = OpenAiConnector::upstream_body(&request);
        assert!(body.get("tollgate").is_none());
        assert_eq!(body["top_p"], serde_json::json!(0.9));
        assert_eq!(body["model"], "gpt-4o");
    }

    #[tokio::test]
    async fn stream_decoder_yields_chunks_then_done() {
        let frames: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from(
                "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\
                 \"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\
                 \"finish_reason\":null}]}\n\n",
            )),
            Ok(bytes::Bytes::from(
                "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\
                 \"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\
                 \"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
            )),
        ];
        let mut stream = decode_openai_stream(futures::stream::iter(frames));

        let first = stream.next().await.unwrap().unwrap();
        match first {
            StreamItem::Chunk(chunk) => assert_eq!(chunk.content(), Some("Hel")),
            StreamItem::Done => panic!("expected chunk"),
        }
        let second = stream.next().await.unwrap().unwrap();
        match second {
            StreamItem::Chunk(chunk) => assert_eq!(chunk.content(), Some("lo")),
            StreamItem::Done => panic!("expected chunk"),
        }
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Done
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn stream_decoder_ends_without_done_marker() {
        let frames: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![Ok(bytes::Bytes::from(
            "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\
             \"model\":\"m\",\"choices\":[]}\n\n",
        ))];
        let mut stream = decode_openai_stream(futures::stream::iter(frames));
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Chunk(_)
        ));
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Done
        ));
    }

    #[tokio::test]
    async fn stream_decoder_propagates_garbage_as_protocol_error() {
        let frames: Vec<Result<bytes::Bytes, reqwest::Error>> =
            vec![Ok(bytes::Bytes::from("data: not-json\n\n"))];
        let mut stream = decode_openai_stream(futures::stream::iter(frames));
        assert!(matches!(
            stream.next().await.unwrap(),
            Err(ConnectorError::Protocol(_))
        ));
        assert!(stream.next().await.is_none());
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::debug;

use tollgate_core::{
    ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChunkChoice, ChunkDelta,
    ConnectorConfig, ConnectorId, Usage,
};

use crate::chat::{ChatConnector, ChatOutcome, ChunkStream, StreamItem};
use crate::error::ConnectorError;
use crate::secret::SecretStore;
use crate::sse::SseDecoder;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1_024;

/// Connector for the Anthropic family.
///
/// Translates between the OpenAI-compatible shapes the gateway speaks and
/// the Anthropic messages wire format, including usage extraction from
/// `message_start` / `message_delta` stream events.
pub struct AnthropicConnector {
    config: ConnectorConfig,
    client: reqwest::Client,
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for AnthropicConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConnector")
            .field("id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicConnector {
    /// Create a connector.
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

    /// Translate the request to the Anthropic messages shape. System
    /// messages collapse into the top-level `system` field.
    pub(crate) fn upstream_body(request: &ChatRequest) -> serde_json::Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages = Vec::new();
        for message in &request.messages {
            if message.role == "system" {
                system_parts.push(&message.content);
            } else {
                messages.push(json!({
                    "role": message.role,
                    "content": message.content,
                }));
            }
        }

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if request.stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn map_stop_reason(reason: Option<&str>) -> Option<String> {
        reason.map(|r| {
            match r {
                "end_turn" | "stop_sequence" => "stop",
                "max_tokens" => "length",
                other => other,
            }
            .to_owned()
        })
    }

    /// Translate a non-streaming Anthropic response.
    pub(crate) fn into_chat_response(
        value: &serde_json::Value,
    ) -> Result<ChatResponse, ConnectorError> {
        let text = value
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| ConnectorError::Protocol("response missing content".into()))?;

        let usage = value.get("usage").map(|u| {
            Usage::new(
                u.get("input_tokens").and_then(serde_json::Value::as_u64).unwrap_or(0),
                u.get("output_tokens").and_then(serde_json::Value::as_u64).unwrap_or(0),
            )
        });

        Ok(ChatResponse {
            id: value
                .get("id")
                .and_then(|i| i.as_str())
                .unwrap_or_default()
                .to_owned(),
            object: "chat.completion".to_owned(),
            created: chrono::Utc::now().timestamp(),
            model: value
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_owned(),
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage::new("assistant", text),
                finish_reason: Self::map_stop_reason(
                    value.get("stop_reason").and_then(|s| s.as_str()),
                ),
            }],
            usage,
            tollgate: None,
        })
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

/// Translate one Anthropic stream event into a [`StreamItem`], tracking
/// the prompt tokens announced in `message_start` so the final usage chunk
/// carries both directions.
pub(crate) fn translate_event(
    data: &str,
    model: &str,
    input_tokens: &mut u64,
) -> Result<Option<StreamItem>, ConnectorError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ConnectorError::Protocol(format!("undecodable stream event: {e}")))?;

    let chunk = |delta: ChunkDelta, finish: Option<String>, usage: Option<Usage>| {
        StreamItem::Chunk(ChatChunk {
            id: String::new(),
            object: "chat.completion.chunk".to_owned(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_owned(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage,
        })
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("message_start") => {
            *input_tokens = value
                .pointer("/message/usage/input_tokens")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            Ok(Some(chunk(
                ChunkDelta {
                    role: Some("assistant".into()),
                    content: None,
                },
                None,
                None,
            )))
        }
        Some("content_block_delta") => {
            let text = value
                .pointer("/delta/text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_owned();
            Ok(Some(chunk(
                ChunkDelta {
                    role: None,
                    content: Some(text),
                },
                None,
                None,
            )))
        }
        Some("message_delta") => {
            let output = value
                .pointer("/usage/output_tokens")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(0);
            let finish = AnthropicConnector::map_stop_reason(
                value.pointer("/delta/stop_reason").and_then(|s| s.as_str()),
            );
            Ok(Some(chunk(
                ChunkDelta::default(),
                finish,
                Some(Usage::new(*input_tokens, output)),
            )))
        }
        Some("message_stop") => Ok(Some(StreamItem::Done)),
        Some("error") => Err(ConnectorError::Server {
            status: 500,
            message: value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("stream error")
                .to_owned(),
        }),
        // ping, content_block_start, content_block_stop
        _ => Ok(None),
    }
}

fn decode_anthropic_stream(
    bytes: impl futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    model: String,
) -> ChunkStream {
    let stream = futures::stream::unfold(
        (Box::pin(bytes), SseDecoder::new(), model, 0_u64, false),
        |(mut bytes, mut decoder, model, mut input_tokens, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(event) = decoder.next_event() {
                    match translate_event(&event.data, &model, &mut input_tokens) {
                        Ok(Some(StreamItem::Done)) => {
                            return Some((
                                Ok(StreamItem::Done),
                                (bytes, decoder, model, input_tokens, true),
                            ));
                        }
                        Ok(Some(item)) => {
                            return Some((
                                Ok(item),
                                (bytes, decoder, model, input_tokens, false),
                            ));
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            return Some((Err(e), (bytes, decoder, model, input_tokens, true)));
                        }
                    }
                }
                match bytes.next().await {
                    Some(Ok(buf)) => decoder.push(&buf),
                    Some(Err(e)) => {
                        return Some((
                            Err(ConnectorError::from_transport(&e)),
                            (bytes, decoder, model, input_tokens, true),
                        ));
                    }
                    None => {
                        return Some((
                            Ok(StreamItem::Done),
                            (bytes, decoder, model, input_tokens, true),
                        ));
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[async_trait]
impl ChatConnector for AnthropicConnector {
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
        let url = format!("{}/messages", self.config.base_url);
        let body = Self::upstream_body(request);
        let key = self.secrets.resolve(&self.config.key_ref).await?;
        debug!(connector = %self.config.id, model = %request.model, stream = request.stream,
            "dispatching upstream");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::from_transport(&e))?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        if request.stream {
            Ok(ChatOutcome::Stream(decode_anthropic_stream(
                response.bytes_stream(),
                request.model.clone(),
            )))
        } else {
            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| ConnectorError::Protocol(e.to_string()))?;
            Ok(ChatOutcome::Complete(Self::into_chat_response(&value)?))
        }
    }

    async fn probe(&self) -> Result<(), ConnectorError> {
        let url = format!("{}/models", self.config.base_url);
        let key = self.secrets.resolve(&self.config.key_ref).await?;
        let response = self
            .client
            .get(&url)
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
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
    use super::*;

    #[test]
    fn body_collapses_system_messages() {
        let request = ChatRequest::new(
            "claude-sonnet",
            vec![
                ChatMessage::new("system", "be brief"),
                ChatMessage::new("user", "hello"),
                ChatMessage::new("assistant", "hi"),
                ChatMessage::new("user", "more"),
            ],
        );
        let body = AnthropicConnector::upstream_body(&request);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["max_tokens"], 1_024);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn body_sets_stream_and_temperature() {
        let mut request = ChatRequest::new("claude-sonnet", vec![ChatMessage::new("user", "x")]);
        request.stream = true;
        request.temperature = Some(0.2);
        request.max_tokens = Some(64);
        let body = AnthropicConnector::upstream_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn response_translation() {
        let value = serde_json::json!({
            "id": "msg_01",
            "model": "claude-sonnet",
            "content": [{"type": "text", "text": "Hello "}, {"type": "text", "text": "world"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let response = AnthropicConnector::into_chat_response(&value).unwrap();
        assert_eq!(response.choices[0].message.content, "Hello world");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn response_missing_content_is_protocol_error() {
        let value = serde_json::json!({"id": "msg_01"});
        assert!(matches!(
            AnthropicConnector::into_chat_response(&value),
            Err(ConnectorError::Protocol(_))
        ));
    }

    #[test]
    fn stream_event_translation() {
        let mut input_tokens = 0;

        let start = r#"{"type":"message_start","message":{"usage":{"input_tokens":25}}}"#;
        let item = translate_event(start, "claude-sonnet", &mut input_tokens)
            .unwrap()
            .unwrap();
        assert!(matches!(item, StreamItem::Chunk(_)));
        assert_eq!(input_tokens, 25);

        let delta = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#;
        let item = translate_event(delta, "claude-sonnet", &mut input_tokens)
            .unwrap()
            .unwrap();
        match item {
            StreamItem::Chunk(chunk) => assert_eq!(chunk.content(), Some("Hi")),
            StreamItem::Done => panic!("expected chunk"),
        }

        let usage = r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#;
        let item = translate_event(usage, "claude-sonnet", &mut input_tokens)
            .unwrap()
            .unwrap();
        match item {
            StreamItem::Chunk(chunk) => {
                let usage = chunk.usage.unwrap();
                assert_eq!(usage.prompt_tokens, 25);
                assert_eq!(usage.completion_tokens, 7);
                assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
            }
            StreamItem::Done => panic!("expected chunk"),
        }

        let stop = r#"{"type":"message_stop"}"#;
        assert!(matches!(
            translate_event(stop, "claude-sonnet", &mut input_tokens)
                .unwrap()
                .unwrap(),
            StreamItem::Done
        ));

        let ping = r#"{"type":"ping"}"#;
        assert!(translate_event(ping, "claude-sonnet", &mut input_tokens)
            .unwrap()
            .is_none());
    }

    #[test]
    fn stream_error_event_surfaces() {
        let mut input_tokens = 0;
        let error = r#"{"type":"error","error":{"message":"overloaded"}}"#;
        assert!(matches!(
            translate_event(error, "m", &mut input_tokens),
            Err(ConnectorError::Server { .. })
        ));
    }
}

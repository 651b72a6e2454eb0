use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use tollgate_core::{ChatMessage, ChatRequest, Usage};
use tollgate_gateway::ChatReply;

use crate::auth::CallerIdentity;
use crate::error::ApiError;
use crate::middleware::{Correlation, RequestCancellation};
use crate::state::AppState;

use super::{build_context, mirror_augmentation};

/// Legacy completions request. The prompt maps onto a single user message.
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: serde_json::Value,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub tollgate: Option<tollgate_core::GatewayOptions>,
    #[serde(flatten)]
    pub passthrough: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn prompt_text(prompt: &serde_json::Value) -> String {
    match prompt {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// `POST /v1/completions` — legacy surface mapped onto the chat pipeline.
pub async fn completions(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Extension(Correlation(correlation_id)): Extension<Correlation>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
    headers: HeaderMap,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, ApiError> {
    let mut chat = ChatRequest::new(
        request.model,
        vec![ChatMessage::new("user", prompt_text(&request.prompt))],
    );
    chat.stream = request.stream;
    chat.max_tokens = request.max_tokens;
    chat.temperature = request.temperature;
    chat.tollgate = request.tollgate;
    chat.passthrough = request.passthrough;

    let ctx = build_context(&identity, &correlation_id, &headers, &chat);

    match state.gateway.handle_chat(ctx, chat, cancel).await {
        Ok(ChatReply::Complete(response)) => {
            let augmentation = response.tollgate.clone();
            let legacy = CompletionResponse {
                id: response.id.clone(),
                object: "text_completion".to_owned(),
                created: response.created,
                model: response.model.clone(),
                choices: response
                    .choices
                    .iter()
                    .map(|choice| CompletionChoice {
                        text: choice.message.content.clone(),
                        index: choice.index,
                        finish_reason: choice.finish_reason.clone(),
                    })
                    .collect(),
                usage: response.usage,
            };
            let mut http = Json(legacy).into_response();
            if let Some(augmentation) = &augmentation {
                mirror_augmentation(http.headers_mut(), augmentation);
            }
            Ok(http)
        }
        Ok(ChatReply::Stream {
            chunks,
            augmentation,
        }) => {
            let events = ReceiverStream::new(chunks)
                .map(|chunk| {
                    let text = chunk.content().unwrap_or_default().to_owned();
                    let legacy = serde_json::json!({
                        "id": chunk.id,
                        "object": "text_completion",
                        "created": chunk.created,
                        "model": chunk.model,
                        "choices": [{
                            "text": text,
                            "index": 0,
                            "finish_reason": chunk.choices.first()
                                .and_then(|c| c.finish_reason.clone()),
                        }],
                    });
                    Ok::<Event, Infallible>(Event::default().data(legacy.to_string()))
                })
                .chain(futures::stream::once(async {
                    Ok(Event::default().data("[DONE]"))
                }));
            let mut http = Sse::new(events).into_response();
            mirror_augmentation(http.headers_mut(), &augmentation);
            Ok(http)
        }
        Err(error) => Err(ApiError::from_gateway(
            &error,
            Some(correlation_id.to_string()),
        )),
    }
}

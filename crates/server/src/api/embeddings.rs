use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use tollgate_core::{RequestContext, Usage};

use crate::auth::CallerIdentity;
use crate::error::ApiError;
use crate::middleware::Correlation;
use crate::state::AppState;

use super::mirror_augmentation;

/// OpenAI-compatible embeddings request. `input` is a string or an array
/// of strings.
#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingObject {
    pub object: String,
    pub index: u32,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: String,
    pub data: Vec<EmbeddingObject>,
    pub model: String,
    pub usage: Usage,
}

fn inputs(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(ToOwned::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// `POST /v1/embeddings` — metered embedding through the configured
/// provider. Each input element settles its own ledger record.
pub async fn embeddings(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Extension(Correlation(correlation_id)): Extension<Correlation>,
    Json(request): Json<EmbeddingsRequest>,
) -> Result<Response, ApiError> {
    let texts = inputs(&request.input);
    if texts.is_empty() {
        return Err(ApiError::new(
            tollgate_core::ErrorCode::MalformedRequest,
            "input must be a string or an array of strings",
        )
        .with_request_id(correlation_id.to_string()));
    }

    let mut data = Vec::with_capacity(texts.len());
    let mut total_tokens = 0;
    let mut last_augmentation = None;
    for (index, text) in texts.iter().enumerate() {
        let ctx = RequestContext::new(
            identity.tenant.as_str(),
            identity.actor.as_str(),
            identity.wallet.as_str(),
            request.model.clone(),
        )
        .with_correlation_id(correlation_id.clone());

        let (vector, augmentation) = state
            .gateway
            .handle_embeddings(ctx, text)
            .await
            .map_err(|e| ApiError::from_gateway(&e, Some(correlation_id.to_string())))?;
        total_tokens += tollgate_metering::estimate_tokens(text);
        data.push(EmbeddingObject {
            object: "embedding".to_owned(),
            index: u32::try_from(index).unwrap_or(u32::MAX),
            embedding: vector,
        });
        last_augmentation = Some(augmentation);
    }

    let body = EmbeddingsResponse {
        object: "list".to_owned(),
        data,
        model: request.model,
        usage: Usage::new(total_tokens, 0),
    };
    let mut http = Json(body).into_response();
    if let Some(augmentation) = &last_augmentation {
        mirror_augmentation(http.headers_mut(), augmentation);
    }
    Ok(http)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_from_string_and_array() {
        assert_eq!(inputs(&serde_json::json!("x")), vec!["x"]);
        assert_eq!(inputs(&serde_json::json!(["a", "b"])), vec!["a", "b"]);
        assert!(inputs(&serde_json::json!(7)).is_empty());
    }
}

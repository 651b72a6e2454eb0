use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use tollgate_core::ChatRequest;
use tollgate_gateway::ChatReply;

use crate::auth::CallerIdentity;
use crate::error::ApiError;
use crate::middleware::{Correlation, RequestCancellation};
use crate::state::AppState;

use super::{build_context, mirror_augmentation};

/// `POST /v1/chat/completions` — the primary OpenAI-compatible endpoint.
///
/// Returns a single JSON body, or an SSE stream of chunks terminated by a
/// `[DONE]` event when the request sets `stream: true`. Either shape
/// carries the gateway augmentation mirrored into `x-tollgate-*` headers.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Completion or SSE stream", body = tollgate_core::ChatResponse),
        (status = 402, description = "Wallet exhausted"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "inference",
)]
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Extension(Correlation(correlation_id)): Extension<Correlation>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let ctx = build_context(&identity, &correlation_id, &headers, &request);

    match state.gateway.handle_chat(ctx, request, cancel).await {
        Ok(ChatReply::Complete(response)) => {
            let augmentation = response.tollgate.clone();
            let mut http = Json(*response).into_response();
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
                    Ok::<Event, Infallible>(
                        Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()),
                    )
                })
                .chain(futures::stream::once(async {
                    Ok(Event::default().data("[DONE]"))
                }));
            let mut http = Sse::new(events)
                .keep_alive(
                    KeepAlive::new()
                        .interval(Duration::from_secs(15))
                        .text("ping"),
                )
                .into_response();
            mirror_augmentation(http.headers_mut(), &augmentation);
            Ok(http)
        }
        Err(error) => Err(ApiError::from_gateway(
            &error,
            Some(correlation_id.to_string()),
        )),
    }
}

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use tollgate_core::{ErrorCode, GatewayError};

/// The wire error envelope: `{ "error": { code, message, type, request_id,
/// details } }`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A request-path error ready to serialize, carrying the correlation id
/// so operators can cross-reference the ledger.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<String>,
    pub retry_after: Option<u64>,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Build from a gateway error plus the request's correlation id.
    #[must_use]
    pub fn from_gateway(error: &GatewayError, request_id: Option<String>) -> Self {
        let retry_after = match error {
            GatewayError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };
        Self {
            code: error.code(),
            message: error.to_string(),
            request_id,
            retry_after,
            details: None,
        }
    }

    /// A bare error with the given code and message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: None,
            retry_after: None,
            details: None,
        }
    }

    /// Attach the correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
                kind: self.code.category(),
                request_id: self.request_id,
                details: self.details,
            },
        };
        let mut response = (status, axum::Json(envelope)).into_response();
        if let Some(retry) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let error = ApiError::new(ErrorCode::WalletExhausted, "no budget")
            .with_request_id("req-1");
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                code: error.code,
                message: error.message.clone(),
                kind: error.code.category(),
                request_id: error.request_id.clone(),
                details: None,
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["code"], "wallet_exhausted");
        assert_eq!(json["error"]["type"], "client_error");
        assert_eq!(json["error"]["request_id"], "req-1");
    }

    #[test]
    fn gateway_error_mapping() {
        let error = ApiError::from_gateway(
            &GatewayError::RateLimited { retry_after: 30 },
            Some("req-2".into()),
        );
        assert_eq!(error.code, ErrorCode::RateLimited);
        assert_eq!(error.retry_after, Some(30));
    }
}

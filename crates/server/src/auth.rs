use std::collections::HashMap;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};

use tollgate_core::ErrorCode;

use crate::config::ApiKeyConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying an API key when no bearer token is used.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Optional tenant override for multi-tenant service accounts.
pub const ORG_OVERRIDE_HEADER: &str = "x-tollgate-organization";

/// The authenticated caller, inserted into request extensions by the auth
/// middleware and read by every handler.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub actor: String,
    pub tenant: String,
    pub wallet: String,
    pub team: Option<String>,
}

/// An entry in the API key lookup table.
#[derive(Debug, Clone)]
pub struct ApiKeyEntry {
    pub actor: String,
    pub tenant: String,
    pub wallet: String,
    pub team: Option<String>,
    pub allowed_tenants: Vec<String>,
}

/// Build an in-memory lookup from `sha256_hex(raw_key)` to its entry.
#[must_use]
pub fn build_api_key_table(configs: &[ApiKeyConfig]) -> HashMap<String, ApiKeyEntry> {
    configs
        .iter()
        .map(|cfg| {
            (
                cfg.key_hash.to_lowercase(),
                ApiKeyEntry {
                    actor: cfg.actor.clone(),
                    tenant: cfg.tenant.clone(),
                    wallet: cfg.wallet.clone(),
                    team: cfg.team.clone(),
                    allowed_tenants: cfg.allowed_tenants.clone(),
                },
            )
        })
        .collect()
}

/// Hash a raw API key to the lookup format (lowercase hex SHA-256).
#[must_use]
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolve the raw credential from the request headers: `Authorization:
/// Bearer <key>` or `x-api-key: <key>`.
fn extract_credential(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(axum::http::header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_owned());
        }
    }
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_owned())
}

/// Authentication middleware: resolves the credential to a
/// [`CallerIdentity`] or rejects with `authentication_failed`.
///
/// The organization override header is honored only when the key's
/// `allowed_tenants` list contains the requested tenant.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(credential) = extract_credential(&request) else {
        return Err(ApiError::new(
            ErrorCode::AuthenticationFailed,
            "missing credentials: send Authorization: Bearer or x-api-key",
        ));
    };

    let hash = hash_api_key(&credential);
    let Some(entry) = state.api_keys.get(&hash) else {
        return Err(ApiError::new(
            ErrorCode::AuthenticationFailed,
            "invalid credentials",
        ));
    };

    let mut identity = CallerIdentity {
        actor: entry.actor.clone(),
        tenant: entry.tenant.clone(),
        wallet: entry.wallet.clone(),
        team: entry.team.clone(),
    };

    if let Some(overridden) = request
        .headers()
        .get(ORG_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        if overridden != entry.tenant {
            if !entry.allowed_tenants.iter().any(|t| t == overridden) {
                return Err(ApiError::new(
                    ErrorCode::AuthenticationFailed,
                    format!("key is not authorized for tenant {overridden}"),
                ));
            }
            identity.tenant = overridden.to_owned();
        }
    }

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

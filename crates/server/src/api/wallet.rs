use axum::extract::State;
use axum::{Extension, Json};
use chrono::{Datelike, Utc};
use serde::Serialize;

use tollgate_core::{ErrorCode, TenantId, WalletId};

use crate::auth::CallerIdentity;
use crate::error::ApiError;
use crate::middleware::Correlation;
use crate::state::AppState;

/// Balance and forecast for the caller's effective wallet chain.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BalanceResponse {
    pub wallet: String,
    pub hard_limit: u64,
    pub spent: u64,
    pub reserved: u64,
    pub overdraft: u64,
    /// Minimum available walking the chain to the root.
    pub effective_available: u64,
    pub utilization_percent: u8,
    /// Naive projection of period-end spend from the burn rate so far.
    pub forecast_period_end_spend: u64,
}

/// `GET /v1/wallet/balance`
#[utoipa::path(
    get,
    path = "/v1/wallet/balance",
    responses((status = 200, body = BalanceResponse)),
    tag = "accounting",
)]
pub async fn balance(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Extension(Correlation(correlation_id)): Extension<Correlation>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let tenant = TenantId::new(identity.tenant.as_str());
    let wallet_id = WalletId::new(identity.wallet.as_str());
    let (wallet, effective) = state
        .gateway
        .wallets()
        .balance(&tenant, &wallet_id)
        .await
        .map_err(|e| {
            ApiError::new(ErrorCode::InternalError, e.to_string())
                .with_request_id(correlation_id.to_string())
        })?;

    // Linear burn-rate projection across the current month.
    let now = Utc::now();
    let day = u64::from(now.day().max(1));
    let days_in_month = 30_u64;
    let forecast = wallet.spent.saturating_mul(days_in_month) / day;

    Ok(Json(BalanceResponse {
        wallet: wallet.id.to_string(),
        hard_limit: wallet.hard_limit,
        spent: wallet.spent,
        reserved: wallet.reserved,
        overdraft: wallet.overdraft,
        effective_available: effective,
        utilization_percent: wallet.utilization_percent(),
        forecast_period_end_spend: forecast,
    }))
}

//! Stored payment-provider connections (tokens arrive out of band).

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{
    payment_connection::{CreatePaymentConnection, PaymentConnection},
    subscription::PaymentProvider,
};
use serde::{Deserialize, Serialize};
use services::services::{
    billing,
    feature_gate::{self, Feature},
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct IntegrationStatus {
    pub provider: PaymentProvider,
    pub connected: bool,
    pub merchant_id: Option<String>,
}

async fn ensure_integrations(state: &AppState, company_id: Uuid) -> Result<(), ApiError> {
    let plan = billing::effective_plan(&state.db.pool, company_id).await?;
    feature_gate::ensure_feature(plan, Feature::Integrations)?;
    Ok(())
}

pub async fn list_integrations(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<Vec<IntegrationStatus>>>, ApiError> {
    ensure_integrations(&state, company.id).await?;

    let connections = PaymentConnection::list_for_company(&state.db.pool, company.id).await?;
    let statuses = [PaymentProvider::Square, PaymentProvider::Stripe]
        .into_iter()
        .map(|provider| {
            let connection = connections.iter().find(|c| c.provider == provider);
            IntegrationStatus {
                provider,
                connected: connection.is_some(),
                merchant_id: connection.and_then(|c| c.merchant_id.clone()),
            }
        })
        .collect();

    Ok(ResponseJson(ApiResponse::success(statuses)))
}

pub async fn get_integration(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(provider): Path<PaymentProvider>,
) -> Result<ResponseJson<ApiResponse<IntegrationStatus>>, ApiError> {
    ensure_integrations(&state, company.id).await?;

    let connection =
        PaymentConnection::find_for_company(&state.db.pool, company.id, provider).await?;
    Ok(ResponseJson(ApiResponse::success(IntegrationStatus {
        provider,
        connected: connection.is_some(),
        merchant_id: connection.and_then(|c| c.merchant_id),
    })))
}

pub async fn connect_integration(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(provider): Path<PaymentProvider>,
    axum::Json(payload): axum::Json<CreatePaymentConnection>,
) -> Result<ResponseJson<ApiResponse<IntegrationStatus>>, ApiError> {
    ensure_integrations(&state, company.id).await?;

    if payload.access_token.trim().is_empty() {
        return Err(ApiError::BadRequest("access token is required".to_string()));
    }

    let connection =
        PaymentConnection::upsert(&state.db.pool, company.id, provider, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(IntegrationStatus {
        provider,
        connected: true,
        merchant_id: connection.merchant_id,
    })))
}

pub async fn disconnect_integration(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(provider): Path<PaymentProvider>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    ensure_integrations(&state, company.id).await?;

    let deleted = PaymentConnection::delete(&state.db.pool, company.id, provider).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("integration"));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/integrations", get(list_integrations))
        .route(
            "/integrations/{provider}",
            get(get_integration)
                .post(connect_integration)
                .delete(disconnect_integration),
        )
}

//! Tenant resolution: `Authorization: Bearer <api_key>` → `Company`.

use axum::{extract::FromRequestParts, http::request::Parts};
use db::models::company::Company;

use crate::{AppState, error::ApiError};

/// Extractor that authenticates the request's tenant. Routes that take this
/// are unreachable without a valid key.
pub struct CompanyAuth(pub Company);

impl FromRequestParts<AppState> for CompanyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let api_key = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?
            .trim();
        if api_key.is_empty() {
            return Err(ApiError::Unauthorized);
        }

        let company = Company::find_by_api_key(&state.db.pool, api_key)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::Unauthorized)?;

        Ok(CompanyAuth(company))
    }
}

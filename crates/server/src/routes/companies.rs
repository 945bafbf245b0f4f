//! Tenant signup and company profile management.

use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::company::{Company, CreateCompany, UpdateCompany, slugify};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError};

/// Signup response. This is the only place the API key is ever returned.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CompanySignupResponse {
    #[serde(flatten)]
    #[ts(flatten)]
    pub company: Company,
    pub api_key: String,
}

pub async fn create_company(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateCompany>,
) -> Result<ResponseJson<ApiResponse<CompanySignupResponse>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("company name is required".to_string()));
    }
    if payload.contact_email.trim().is_empty() || !payload.contact_email.contains('@') {
        return Err(ApiError::BadRequest(
            "a valid contact email is required".to_string(),
        ));
    }

    let slug = payload
        .slug
        .clone()
        .unwrap_or_else(|| slugify(&payload.name));
    if Company::find_by_slug(&state.db.pool, &slug).await?.is_some() {
        return Err(ApiError::Conflict(format!(
            "a company with the slug '{slug}' already exists"
        )));
    }

    let company = Company::create(&state.db.pool, &payload, Uuid::new_v4()).await?;
    let api_key = company.api_key.clone();

    Ok(ResponseJson(ApiResponse::success(CompanySignupResponse {
        company,
        api_key,
    })))
}

pub async fn get_company(
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<Company>>, ApiError> {
    Ok(ResponseJson(ApiResponse::success(company)))
}

pub async fn update_company(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<UpdateCompany>,
) -> Result<ResponseJson<ApiResponse<Company>>, ApiError> {
    if let Some(email) = &payload.contact_email {
        if !email.contains('@') {
            return Err(ApiError::BadRequest(
                "a valid contact email is required".to_string(),
            ));
        }
    }

    let updated = Company::update(&state.db.pool, company.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(updated)))
}

/// Delete the tenant and, via foreign keys, everything it owns.
pub async fn delete_company(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    Company::delete(&state.db.pool, company.id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/companies", post(create_company))
        .route(
            "/company",
            get(get_company).put(update_company).delete(delete_company),
        )
}

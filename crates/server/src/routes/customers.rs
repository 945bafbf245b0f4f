use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::customer::{CreateCustomer, Customer, UpdateCustomer};
use services::services::{billing, feature_gate};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError};

pub async fn list_customers(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<Vec<Customer>>>, ApiError> {
    let customers = Customer::list_for_company(&state.db.pool, company.id).await?;
    Ok(ResponseJson(ApiResponse::success(customers)))
}

pub async fn create_customer(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<CreateCustomer>,
) -> Result<ResponseJson<ApiResponse<Customer>>, ApiError> {
    if payload.name.trim().is_empty() {
        return Err(ApiError::BadRequest("customer name is required".to_string()));
    }

    let plan = billing::effective_plan(&state.db.pool, company.id).await?;
    let used = Customer::count_for_company(&state.db.pool, company.id).await?;
    feature_gate::ensure_within_limit(plan, feature_gate::Quota::Customers, used)?;

    let customer = Customer::create(&state.db.pool, company.id, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(customer)))
}

pub async fn get_customer(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Customer>>, ApiError> {
    let customer = Customer::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("customer"))?;
    Ok(ResponseJson(ApiResponse::success(customer)))
}

pub async fn update_customer(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateCustomer>,
) -> Result<ResponseJson<ApiResponse<Customer>>, ApiError> {
    let customer = Customer::update(&state.db.pool, company.id, id, &payload)
        .await?
        .ok_or(ApiError::NotFound("customer"))?;
    Ok(ResponseJson(ApiResponse::success(customer)))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let deleted = Customer::delete(&state.db.pool, company.id, id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("customer"));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers", get(list_customers).post(create_customer))
        .route(
            "/customers/{id}",
            get(get_customer).put(update_customer).delete(delete_customer),
        )
}

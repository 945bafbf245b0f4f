use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::product::{CreateProduct, Product, ProductFilter, UpdateProduct};
use services::services::{billing, feature_gate};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError};

pub async fn list_products(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Query(filter): Query<ProductFilter>,
) -> Result<ResponseJson<ApiResponse<Vec<Product>>>, ApiError> {
    let products = Product::list_for_company(&state.db.pool, company.id, &filter).await?;
    Ok(ResponseJson(ApiResponse::success(products)))
}

pub async fn create_product(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<CreateProduct>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    if payload.name.trim().is_empty() || payload.sku.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "product name and sku are required".to_string(),
        ));
    }
    if payload.unit_price_cents < 0 {
        return Err(ApiError::BadRequest(
            "unit price must not be negative".to_string(),
        ));
    }

    let plan = billing::effective_plan(&state.db.pool, company.id).await?;
    let used = Product::count_for_company(&state.db.pool, company.id).await?;
    feature_gate::ensure_within_limit(plan, feature_gate::Quota::Products, used)?;

    let product = Product::create(&state.db.pool, company.id, &payload, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

pub async fn get_product(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    let product = Product::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("product"))?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateProduct>,
) -> Result<ResponseJson<ApiResponse<Product>>, ApiError> {
    if let Some(price) = payload.unit_price_cents {
        if price < 0 {
            return Err(ApiError::BadRequest(
                "unit price must not be negative".to_string(),
            ));
        }
    }

    let product = Product::update(&state.db.pool, company.id, id, &payload)
        .await?
        .ok_or(ApiError::NotFound("product"))?;
    Ok(ResponseJson(ApiResponse::success(product)))
}

pub async fn delete_product(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let deleted = Product::delete(&state.db.pool, company.id, id).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound("product"));
    }
    Ok(ResponseJson(ApiResponse::success(())))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route(
            "/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
}

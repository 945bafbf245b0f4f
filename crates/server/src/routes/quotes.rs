//! Quote CRUD, lifecycle actions, and the rendered document.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{Html, Json as ResponseJson},
    routing::{get, post},
};
use db::models::quote::{CreateQuote, Quote, QuoteStatus, QuoteWithItems, UpdateQuote};
use serde::{Deserialize, Serialize};
use services::services::{
    billing,
    feature_gate::{self, Feature},
    pricing::QuoteTotals,
    quotes::QuoteService,
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError, routes::month_start};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct QuoteResponse {
    #[serde(flatten)]
    #[ts(flatten)]
    pub quote: QuoteWithItems,
    pub totals: QuoteTotals,
}

#[derive(Debug, Deserialize, TS)]
pub struct ListQuotesQuery {
    pub status: Option<QuoteStatus>,
}

fn respond(quote: QuoteWithItems, totals: QuoteTotals) -> ResponseJson<ApiResponse<QuoteResponse>> {
    ResponseJson(ApiResponse::success(QuoteResponse { quote, totals }))
}

pub async fn create_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<CreateQuote>,
) -> Result<ResponseJson<ApiResponse<QuoteResponse>>, ApiError> {
    let plan = billing::effective_plan(&state.db.pool, company.id).await?;
    let used = Quote::count_created_since(&state.db.pool, company.id, month_start()?).await?;
    feature_gate::ensure_within_limit(plan, feature_gate::Quota::QuotesPerMonth, used)?;

    let (quote, totals) = QuoteService::create(&state.db.pool, &company, &payload).await?;
    Ok(respond(quote, totals))
}

pub async fn list_quotes(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Query(query): Query<ListQuotesQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Quote>>>, ApiError> {
    let quotes = Quote::list_for_company(&state.db.pool, company.id, query.status).await?;
    Ok(ResponseJson(ApiResponse::success(quotes)))
}

pub async fn get_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<QuoteResponse>>, ApiError> {
    let quote = Quote::find_with_items(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("quote"))?;
    let totals = QuoteService::totals(&quote)?;
    Ok(respond(quote, totals))
}

pub async fn update_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
    axum::Json(payload): axum::Json<UpdateQuote>,
) -> Result<ResponseJson<ApiResponse<QuoteResponse>>, ApiError> {
    let (quote, totals) = QuoteService::update(&state.db.pool, &company, id, &payload).await?;
    Ok(respond(quote, totals))
}

pub async fn delete_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let quote = Quote::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("quote"))?;
    if quote.status != QuoteStatus::Draft {
        return Err(ApiError::Conflict(
            "only draft quotes can be deleted".to_string(),
        ));
    }
    Quote::delete(&state.db.pool, company.id, id).await?;
    Ok(ResponseJson(ApiResponse::success(())))
}

async fn branded_for(state: &AppState, company_id: Uuid) -> Result<bool, ApiError> {
    let plan = billing::effective_plan(&state.db.pool, company_id).await?;
    Ok(feature_gate::plan_includes(plan, Feature::BrandedDocuments))
}

pub async fn send_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Quote>>, ApiError> {
    let branded = branded_for(&state, company.id).await?;
    let quote = QuoteService::send(&state.db.pool, &company, id, &state.mailer, branded).await?;
    Ok(ResponseJson(ApiResponse::success(quote)))
}

pub async fn mark_viewed(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Quote>>, ApiError> {
    let quote =
        QuoteService::transition(&state.db.pool, &company, id, QuoteStatus::Viewed).await?;
    Ok(ResponseJson(ApiResponse::success(quote)))
}

pub async fn accept_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Quote>>, ApiError> {
    let quote =
        QuoteService::transition(&state.db.pool, &company, id, QuoteStatus::Accepted).await?;
    Ok(ResponseJson(ApiResponse::success(quote)))
}

pub async fn decline_quote(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Quote>>, ApiError> {
    let quote =
        QuoteService::transition(&state.db.pool, &company, id, QuoteStatus::Declined).await?;
    Ok(ResponseJson(ApiResponse::success(quote)))
}

pub async fn quote_document(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, ApiError> {
    let branded = branded_for(&state, company.id).await?;
    let html = QuoteService::document(&state.db.pool, &company, id, branded).await?;
    Ok(Html(html))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quotes", get(list_quotes).post(create_quote))
        .route(
            "/quotes/{id}",
            get(get_quote).put(update_quote).delete(delete_quote),
        )
        .route("/quotes/{id}/send", post(send_quote))
        .route("/quotes/{id}/view", post(mark_viewed))
        .route("/quotes/{id}/accept", post(accept_quote))
        .route("/quotes/{id}/decline", post(decline_quote))
        .route("/quotes/{id}/document", get(quote_document))
}

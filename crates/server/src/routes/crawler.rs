//! Crawl job queueing and status. The background worker does the fetching.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::crawl_job::CrawlJob;
use serde::{Deserialize, Serialize};
use services::services::{
    billing,
    feature_gate::{self, Feature},
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{AppState, auth::CompanyAuth, error::ApiError, routes::day_start};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateCrawlJobRequest {
    pub vendor: String,
}

#[derive(Debug, Deserialize, TS)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

pub async fn create_job(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<CreateCrawlJobRequest>,
) -> Result<ResponseJson<ApiResponse<CrawlJob>>, ApiError> {
    let plan = billing::effective_plan(&state.db.pool, company.id).await?;
    feature_gate::ensure_feature(plan, Feature::Crawler)?;

    let used = CrawlJob::count_created_since(&state.db.pool, company.id, day_start()?).await?;
    feature_gate::ensure_within_limit(plan, feature_gate::Quota::CrawlJobsPerDay, used)?;

    let vendor = payload.vendor.trim();
    let known = state
        .config
        .crawler
        .targets
        .iter()
        .any(|t| t.vendor == vendor);
    if !known {
        return Err(ApiError::BadRequest(format!(
            "no crawl target configured for vendor '{vendor}'"
        )));
    }

    let job = CrawlJob::create(&state.db.pool, company.id, vendor, Uuid::new_v4()).await?;
    Ok(ResponseJson(ApiResponse::success(job)))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Query(query): Query<ListJobsQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<CrawlJob>>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let jobs = CrawlJob::list_for_company(&state.db.pool, company.id, limit).await?;
    Ok(ResponseJson(ApiResponse::success(jobs)))
}

pub async fn get_job(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CrawlJob>>, ApiError> {
    let job = CrawlJob::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("crawl job"))?;
    Ok(ResponseJson(ApiResponse::success(job)))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CrawlJob>>, ApiError> {
    CrawlJob::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("crawl job"))?;

    let canceled = CrawlJob::cancel(&state.db.pool, company.id, id).await?;
    if !canceled {
        return Err(ApiError::Conflict("crawl job already finished".to_string()));
    }

    let job = CrawlJob::find_for_company(&state.db.pool, company.id, id)
        .await?
        .ok_or(ApiError::NotFound("crawl job"))?;
    Ok(ResponseJson(ApiResponse::success(job)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/crawler/jobs", get(list_jobs).post(create_job))
        .route("/crawler/jobs/{id}", get(get_job))
        .route("/crawler/jobs/{id}/cancel", post(cancel_job))
}

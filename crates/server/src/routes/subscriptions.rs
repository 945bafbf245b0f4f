//! Plan overview, checkout, and cancellation.

use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use db::models::{
    crawl_job::CrawlJob,
    customer::Customer,
    product::Product,
    quote::Quote,
    subscription::{PaymentProvider, PlanTier, Subscription, SubscriptionStatus},
};
use serde::{Deserialize, Serialize};
use services::services::{
    feature_gate::{self, PlanLimits},
    payments::CheckoutLink,
};
use ts_rs::TS;
use utils::response::ApiResponse;

use crate::{
    AppState,
    auth::CompanyAuth,
    error::ApiError,
    routes::{day_start, month_start},
};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct QuotaUsage {
    pub used: i64,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UsageSummary {
    pub customers: QuotaUsage,
    pub products: QuotaUsage,
    pub quotes_this_month: QuotaUsage,
    pub crawl_jobs_today: QuotaUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct SubscriptionOverview {
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub provider: Option<PaymentProvider>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub usage: UsageSummary,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CheckoutRequest {
    pub plan: PlanTier,
    pub provider: PaymentProvider,
}

pub async fn get_subscription(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<SubscriptionOverview>>, ApiError> {
    let pool = &state.db.pool;
    let subscription = Subscription::find_by_company(pool, company.id).await?;
    let plan = Subscription::effective_plan(subscription.as_ref());
    let PlanLimits {
        max_customers,
        max_products,
        max_quotes_per_month,
        max_crawl_jobs_per_day,
    } = feature_gate::limits(plan);

    let usage = UsageSummary {
        customers: QuotaUsage {
            used: Customer::count_for_company(pool, company.id).await?,
            limit: max_customers,
        },
        products: QuotaUsage {
            used: Product::count_for_company(pool, company.id).await?,
            limit: max_products,
        },
        quotes_this_month: QuotaUsage {
            used: Quote::count_created_since(pool, company.id, month_start()?).await?,
            limit: max_quotes_per_month,
        },
        crawl_jobs_today: QuotaUsage {
            used: CrawlJob::count_created_since(pool, company.id, day_start()?).await?,
            limit: max_crawl_jobs_per_day,
        },
    };

    let overview = SubscriptionOverview {
        plan,
        status: subscription
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(SubscriptionStatus::Active),
        provider: subscription.as_ref().and_then(|s| s.provider),
        current_period_end: subscription.as_ref().and_then(|s| s.current_period_end),
        cancel_at_period_end: subscription
            .as_ref()
            .map(|s| s.cancel_at_period_end)
            .unwrap_or(false),
        usage,
    };

    Ok(ResponseJson(ApiResponse::success(overview)))
}

pub async fn checkout(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
    axum::Json(payload): axum::Json<CheckoutRequest>,
) -> Result<ResponseJson<ApiResponse<CheckoutLink>>, ApiError> {
    if payload.plan == PlanTier::Free {
        return Err(ApiError::BadRequest(
            "the free plan has no checkout".to_string(),
        ));
    }

    let link = match payload.provider {
        PaymentProvider::Stripe => {
            let stripe = state
                .stripe
                .as_ref()
                .ok_or(ApiError::ServiceUnavailable("stripe"))?;
            stripe
                .create_checkout_session(
                    company.id,
                    payload.plan,
                    &state.config.checkout_success_url,
                    &state.config.checkout_cancel_url,
                )
                .await?
        }
        PaymentProvider::Square => {
            let square = state
                .square
                .as_ref()
                .ok_or(ApiError::ServiceUnavailable("square"))?;
            let price_cents = match payload.plan {
                PlanTier::Pro => state.config.pro_price_cents,
                PlanTier::Enterprise => state.config.enterprise_price_cents,
                PlanTier::Free => 0,
            };
            square
                .create_payment_link(company.id, payload.plan, price_cents, &company.currency)
                .await?
        }
    };

    Ok(ResponseJson(ApiResponse::success(link)))
}

pub async fn cancel(
    State(state): State<AppState>,
    CompanyAuth(company): CompanyAuth,
) -> Result<ResponseJson<ApiResponse<Subscription>>, ApiError> {
    let subscription = Subscription::set_cancel_at_period_end(&state.db.pool, company.id, true)
        .await?
        .ok_or(ApiError::NotFound("subscription"))?;
    Ok(ResponseJson(ApiResponse::success(subscription)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", get(get_subscription))
        .route("/subscriptions/checkout", post(checkout))
        .route("/subscriptions/cancel", post(cancel))
}

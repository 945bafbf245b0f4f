//! Provider webhook intake. These routes carry no tenant auth; the request is
//! authenticated by its HMAC signature against the raw body. Signature
//! failures are rejected, replays are acknowledged without re-applying, and
//! processing failures return 500 so the provider redelivers.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json as ResponseJson,
    routing::post,
};
use db::models::subscription::PaymentProvider;
use services::services::billing::{self, ProcessOutcome};
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const SQUARE_SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";

fn header<'h>(headers: &'h HeaderMap, name: &'static str) -> Result<&'h str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {name} header")))
}

fn outcome_response(outcome: ProcessOutcome) -> ResponseJson<ApiResponse<()>> {
    let message = match outcome {
        ProcessOutcome::Processed => "processed",
        ProcessOutcome::AlreadyProcessed => "already processed",
        ProcessOutcome::Ignored => "ignored",
    };
    ResponseJson(ApiResponse::success_with_message((), message))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or(ApiError::ServiceUnavailable("stripe"))?;

    let signature = header(&headers, STRIPE_SIGNATURE_HEADER)?;
    if !stripe.verify_webhook_signature(&body, signature)? {
        return Err(ApiError::Unauthorized);
    }

    let outcome = billing::process_event(&state.db.pool, PaymentProvider::Stripe, &body).await?;
    Ok(outcome_response(outcome))
}

pub async fn square_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let square = state
        .square
        .as_ref()
        .ok_or(ApiError::ServiceUnavailable("square"))?;

    let signature = header(&headers, SQUARE_SIGNATURE_HEADER)?;
    if !square.verify_webhook_signature(&body, signature)? {
        return Err(ApiError::Unauthorized);
    }

    let outcome = billing::process_event(&state.db.pool, PaymentProvider::Square, &body).await?;
    Ok(outcome_response(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/webhooks/square", post(square_webhook))
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{
    billing::BillingError, feature_gate::GateError, payments::PaymentError, pricing::PricingError,
    quotes::QuoteError,
};
use tracing::error;
use utils::response::ApiResponse;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    NotFound(&'static str),
    Conflict(String),
    ServiceUnavailable(&'static str),
    Upstream(String),
    Database(sqlx::Error),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid API key".to_string(),
            ),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::ServiceUnavailable(what) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("{what} is not configured"),
            ),
            ApiError::Upstream(message) => {
                error!("upstream provider error: {}", message);
                (StatusCode::BAD_GATEWAY, message)
            }
            ApiError::Database(e) => {
                error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
            ApiError::Internal(message) => {
                error!("internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound("resource"),
            e if e
                .as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false) =>
            {
                ApiError::Conflict("a record with those values already exists".to_string())
            }
            e => ApiError::Database(e),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        ApiError::Forbidden(e.to_string())
    }
}

impl From<PricingError> for ApiError {
    fn from(e: PricingError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<QuoteError> for ApiError {
    fn from(e: QuoteError) -> Self {
        match e {
            QuoteError::Database(e) => e.into(),
            QuoteError::Pricing(e) => e.into(),
            QuoteError::CustomerNotFound => ApiError::NotFound("customer"),
            QuoteError::QuoteNotFound => ApiError::NotFound("quote"),
            QuoteError::NotEditable(_) | QuoteError::IllegalTransition { .. } => {
                ApiError::Conflict(e.to_string())
            }
            QuoteError::CustomerHasNoEmail => ApiError::BadRequest(e.to_string()),
            QuoteError::Mailer(e) => ApiError::Upstream(e.to_string()),
            QuoteError::Render(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Database(e) => e.into(),
            BillingError::MalformedPayload(message) => ApiError::BadRequest(message),
            BillingError::Apply { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::MalformedSignature(message) => ApiError::BadRequest(message),
            e => ApiError::Upstream(e.to_string()),
        }
    }
}

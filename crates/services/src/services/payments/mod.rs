//! Thin REST clients for the two payment providers. No SDK crates; each
//! client owns request shaping, retry on transient failures, and webhook
//! signature verification for its provider.

pub mod square;
pub mod stripe;

use std::time::Duration;

use thiserror::Error;

pub use square::{SquareClient, SquareConfig};
pub use stripe::{StripeClient, StripeConfig};

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("json error: {0}")]
    Serde(String),
    #[error("malformed signature header: {0}")]
    MalformedSignature(String),
}

impl PaymentError {
    /// Transient failures worth retrying with backoff.
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> PaymentError {
    if e.is_timeout() {
        PaymentError::Timeout
    } else {
        PaymentError::Transport(e.to_string())
    }
}

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A hosted checkout page the customer is redirected to.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, ts_rs::TS)]
pub struct CheckoutLink {
    pub url: String,
    pub provider_reference: String,
}

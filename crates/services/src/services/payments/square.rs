//! Square REST client: payment links and webhook signature checks.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use db::models::subscription::PlanTier;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use super::{CheckoutLink, PaymentError, REQUEST_TIMEOUT, map_reqwest_error};

const SQUARE_API_URL: &str = "https://connect.squareup.com/v2";
const SQUARE_VERSION: &str = "2025-01-23";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SquareConfig {
    pub access_token: String,
    pub webhook_signature_key: String,
    /// The exact URL Square was told to deliver webhooks to; it is part of
    /// the signed message.
    pub notification_url: String,
    pub location_id: String,
}

#[derive(Debug, Clone)]
pub struct SquareClient {
    http: Client,
    config: SquareConfig,
}

#[derive(Debug, Deserialize)]
struct PaymentLinkResponse {
    payment_link: PaymentLink,
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    id: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct Money {
    amount: i64,
    currency: String,
}

impl SquareClient {
    pub fn new(config: SquareConfig) -> Result<Self, PaymentError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("quotecrawler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Verify `x-square-hmacsha256-signature`: base64 HMAC-SHA256 over the
    /// notification URL concatenated with the raw body.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<bool, PaymentError> {
        if signature_header.is_empty() {
            return Err(PaymentError::MalformedSignature(
                "empty signature header".to_string(),
            ));
        }

        let Ok(provided) = BASE64.decode(signature_header) else {
            return Ok(false);
        };

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_signature_key.as_bytes())
            .map_err(|e| PaymentError::MalformedSignature(e.to_string()))?;
        mac.update(self.config.notification_url.as_bytes());
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        Ok(expected.ct_eq(provided.as_slice()).into())
    }

    /// Create a hosted payment link for a plan purchase. The company id is
    /// carried in the order reference so the webhook can find the tenant.
    pub async fn create_payment_link(
        &self,
        company_id: Uuid,
        plan: PlanTier,
        plan_price_cents: i64,
        currency: &str,
    ) -> Result<CheckoutLink, PaymentError> {
        if plan == PlanTier::Free {
            return Err(PaymentError::Serde("free plan has no checkout".to_string()));
        }

        let body = json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "order": {
                "location_id": self.config.location_id,
                "reference_id": company_id.to_string(),
                "line_items": [{
                    "name": format!("QuoteCrawler {plan} plan"),
                    "quantity": "1",
                    "base_price_money": Money {
                        amount: plan_price_cents,
                        currency: currency.to_string(),
                    },
                }],
            },
            "payment_note": plan.to_string(),
        });

        let response: PaymentLinkResponse = (|| async {
            self.post_json("/online-checkout/payment-links", &body).await
        })
        .retry(retry_policy())
        .when(|e: &PaymentError| e.should_retry())
        .notify(|e, dur| {
            warn!(
                "Square request failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            )
        })
        .await?;

        Ok(CheckoutLink {
            url: response.payment_link.url,
            provider_reference: response.payment_link.id,
        })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, PaymentError> {
        let res = self
            .http
            .post(format!("{SQUARE_API_URL}{path}"))
            .bearer_auth(&self.config.access_token)
            .header("Square-Version", SQUARE_VERSION)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| PaymentError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(PaymentError::InvalidCredentials),
            StatusCode::TOO_MANY_REQUESTS => Err(PaymentError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(PaymentError::Http { status, body })
            }
        }
    }
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(15))
        .with_max_times(3)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/api/webhooks/square";

    fn test_client() -> SquareClient {
        SquareClient::new(SquareConfig {
            access_token: "sq0atp-xxx".to_string(),
            webhook_signature_key: "sq_sig_key".to_string(),
            notification_url: URL.to_string(),
            location_id: "L123".to_string(),
        })
        .unwrap()
    }

    fn sign(payload: &[u8], key: &str, url: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(url.as_bytes());
        mac.update(payload);
        BASE64.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let client = test_client();
        let payload = br#"{"type":"subscription.updated"}"#;
        let header = sign(payload, "sq_sig_key", URL);
        assert!(client.verify_webhook_signature(payload, &header).unwrap());
    }

    #[test]
    fn rejects_wrong_key_or_url() {
        let client = test_client();
        let payload = br#"{"type":"subscription.updated"}"#;
        let wrong_key = sign(payload, "other_key", URL);
        assert!(!client.verify_webhook_signature(payload, &wrong_key).unwrap());
        let wrong_url = sign(payload, "sq_sig_key", "https://elsewhere.example/hook");
        assert!(!client.verify_webhook_signature(payload, &wrong_url).unwrap());
    }

    #[test]
    fn rejects_tampered_payload() {
        let client = test_client();
        let original = br#"{"type":"subscription.updated"}"#;
        let header = sign(original, "sq_sig_key", URL);
        let tampered = br#"{"type":"subscription.updated","x":1}"#;
        assert!(!client.verify_webhook_signature(tampered, &header).unwrap());
    }

    #[test]
    fn empty_header_is_an_error() {
        let client = test_client();
        assert!(client.verify_webhook_signature(b"{}", "").is_err());
    }

    #[test]
    fn non_base64_signature_is_rejected() {
        let client = test_client();
        assert!(!client.verify_webhook_signature(b"{}", "!!not-base64!!").unwrap());
    }
}

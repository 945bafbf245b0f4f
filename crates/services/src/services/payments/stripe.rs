//! Stripe REST client: checkout sessions and webhook signature checks.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use db::models::subscription::PlanTier;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use uuid::Uuid;

use super::{CheckoutLink, PaymentError, REQUEST_TIMEOUT, map_reqwest_error};

const STRIPE_API_URL: &str = "https://api.stripe.com/v1";

/// Signed timestamps older than this are treated as replays.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_id_pro: String,
    pub price_id_enterprise: String,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    http: Client,
    config: StripeConfig,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: String,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("quotecrawler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Verify the `stripe-signature` header (`t=<ts>,v1=<hex>`) against the
    /// raw request body. Malformed headers are an error; a wrong or stale
    /// signature is `Ok(false)`.
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<bool, PaymentError> {
        let mut timestamp: Option<&str> = None;
        let mut signature: Option<&str> = None;
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            PaymentError::MalformedSignature("missing timestamp".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            PaymentError::MalformedSignature("missing v1 signature".to_string())
        })?;

        let timestamp_secs: i64 = timestamp.parse().map_err(|_| {
            PaymentError::MalformedSignature(format!("bad timestamp: {timestamp}"))
        })?;
        if (Utc::now().timestamp() - timestamp_secs).abs() > SIGNATURE_TOLERANCE_SECS {
            return Ok(false);
        }

        let Ok(provided) = hex::decode(signature) else {
            return Ok(false);
        };

        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|e| PaymentError::MalformedSignature(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        Ok(expected.ct_eq(provided.as_slice()).into())
    }

    /// Create a subscription checkout session for the given plan. The company
    /// id rides in the session metadata so the webhook can find the tenant.
    pub async fn create_checkout_session(
        &self,
        company_id: Uuid,
        plan: PlanTier,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutLink, PaymentError> {
        let price_id = match plan {
            PlanTier::Pro => self.config.price_id_pro.as_str(),
            PlanTier::Enterprise => self.config.price_id_enterprise.as_str(),
            PlanTier::Free => {
                return Err(PaymentError::Serde(
                    "free plan has no checkout".to_string(),
                ));
            }
        };

        let company = company_id.to_string();
        let plan_slug = plan.to_string();
        let form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", success_url),
            ("cancel_url", cancel_url),
            ("metadata[company_id]", &company),
            ("metadata[plan]", &plan_slug),
            ("subscription_data[metadata][company_id]", &company),
            ("subscription_data[metadata][plan]", &plan_slug),
        ];

        let session: CheckoutSessionResponse = (|| async {
            self.post_form("/checkout/sessions", &form).await
        })
        .retry(retry_policy())
        .when(|e: &PaymentError| e.should_retry())
        .notify(|e, dur| {
            warn!(
                "Stripe request failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            )
        })
        .await?;

        Ok(CheckoutLink {
            url: session.url,
            provider_reference: session.id,
        })
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, PaymentError> {
        let res = self
            .http
            .post(format!("{STRIPE_API_URL}{path}"))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(form)
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

    fn test_client() -> StripeClient {
        StripeClient::new(StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: "whsec_test123secret456".to_string(),
            price_id_pro: "price_pro".to_string(),
            price_id_enterprise: "price_ent".to_string(),
        })
        .unwrap()
    }

    fn sign(payload: &[u8], secret: &str, timestamp: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let client = test_client();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_test123secret456", &ts));
        assert!(client.verify_webhook_signature(payload, &header).unwrap());
    }

    #[test]
    fn rejects_wrong_secret() {
        let client = test_client();
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let ts = Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "wrong_secret", &ts));
        assert!(!client.verify_webhook_signature(payload, &header).unwrap());
    }

    #[test]
    fn rejects_tampered_payload() {
        let client = test_client();
        let original = br#"{"type":"checkout.session.completed"}"#;
        let tampered = br#"{"type":"checkout.session.completed","extra":1}"#;
        let ts = Utc::now().timestamp().to_string();
        let header = format!("t={},v1={}", ts, sign(original, "whsec_test123secret456", &ts));
        assert!(!client.verify_webhook_signature(tampered, &header).unwrap());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let client = test_client();
        let payload = br#"{"type":"invoice.paid"}"#;
        let ts = (Utc::now().timestamp() - 600).to_string();
        let header = format!("t={},v1={}", ts, sign(payload, "whsec_test123secret456", &ts));
        assert!(!client.verify_webhook_signature(payload, &header).unwrap());
    }

    #[test]
    fn malformed_headers_error() {
        let client = test_client();
        let payload = b"{}";
        assert!(client.verify_webhook_signature(payload, "").is_err());
        assert!(client.verify_webhook_signature(payload, "garbage").is_err());
        assert!(client.verify_webhook_signature(payload, "t=123").is_err());
        assert!(client.verify_webhook_signature(payload, "v1=abc").is_err());
    }

    #[test]
    fn non_hex_signature_is_rejected_not_an_error() {
        let client = test_client();
        let payload = b"{}";
        let ts = Utc::now().timestamp().to_string();
        let header = format!("t={ts},v1=not-hex");
        assert!(!client.verify_webhook_signature(payload, &header).unwrap());
    }
}

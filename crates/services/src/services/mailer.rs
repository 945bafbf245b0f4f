//! Outbound mail via the Gmail-style REST send endpoint. The message is
//! assembled as RFC 2822 and posted base64url-encoded with a bearer token.
//! Without a token the mailer is disabled and sends become logged no-ops.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum MailerError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout")]
    Timeout,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid mail credentials")]
    InvalidCredentials,
}

impl MailerError {
    fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    pub api_token: Option<String>,
    pub from_address: String,
    pub api_base: String,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            from_address: "quotes@localhost".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Mailer {
    http: Client,
    config: MailerConfig,
}

impl Mailer {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(config: MailerConfig) -> Result<Self, MailerError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("quotecrawler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_token.is_some()
    }

    pub async fn send_html(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), MailerError> {
        let Some(token) = &self.config.api_token else {
            warn!(to = %to, subject = %subject, "Mailer disabled, skipping send");
            return Ok(());
        };

        let raw = build_raw_message(&self.config.from_address, to, subject, html_body);
        let body = serde_json::json!({ "raw": raw });
        let url = format!("{}/users/me/messages/send", self.config.api_base);

        (|| async { self.post_once(&url, token, &body).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(15))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &MailerError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Mail send failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await?;

        info!(to = %to, subject = %subject, "Quote email sent");
        Ok(())
    }

    async fn post_once(
        &self,
        url: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<(), MailerError> {
        let res = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MailerError::Timeout
                } else {
                    MailerError::Transport(e.to_string())
                }
            })?;

        match res.status() {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(MailerError::InvalidCredentials)
            }
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(MailerError::Http { status, body })
            }
        }
    }
}

fn build_raw_message(from: &str, to: &str, subject: &str, html_body: &str) -> String {
    let message = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html_body}"
    );
    URL_SAFE_NO_PAD.encode(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_round_trips() {
        let raw = build_raw_message("a@example.com", "b@example.com", "Your quote", "<p>hi</p>");
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(decoded.starts_with("From: a@example.com\r\n"));
        assert!(decoded.contains("To: b@example.com"));
        assert!(decoded.contains("Subject: Your quote"));
        assert!(decoded.ends_with("<p>hi</p>"));
    }

    #[tokio::test]
    async fn disabled_mailer_is_a_noop() {
        let mailer = Mailer::new(MailerConfig::default()).unwrap();
        assert!(!mailer.is_enabled());
        mailer
            .send_html("b@example.com", "Your quote", "<p>hi</p>")
            .await
            .unwrap();
    }
}

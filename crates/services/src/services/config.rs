//! Environment-variable configuration for the server binary.

use std::time::Duration;

use thiserror::Error;

use super::{
    crawler::{CrawlTarget, CrawlerSettings},
    mailer::MailerConfig,
    payments::{SquareConfig, StripeConfig},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub stripe: Option<StripeConfig>,
    pub square: Option<SquareConfig>,
    pub mailer: MailerConfig,
    pub crawler_enabled: bool,
    pub crawler: CrawlerSettings,
    pub pro_price_cents: i64,
    pub enterprise_price_cents: i64,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::MissingVar(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: name,
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let stripe = match var("STRIPE_SECRET_KEY") {
            Some(secret_key) => Some(StripeConfig {
                secret_key,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                price_id_pro: required("STRIPE_PRICE_PRO")?,
                price_id_enterprise: required("STRIPE_PRICE_ENTERPRISE")?,
            }),
            None => None,
        };

        let square = match var("SQUARE_ACCESS_TOKEN") {
            Some(access_token) => Some(SquareConfig {
                access_token,
                webhook_signature_key: required("SQUARE_WEBHOOK_SIGNATURE_KEY")?,
                notification_url: required("SQUARE_NOTIFICATION_URL")?,
                location_id: required("SQUARE_LOCATION_ID")?,
            }),
            None => None,
        };

        let mailer = MailerConfig {
            api_token: var("MAILER_TOKEN"),
            from_address: var("MAILER_FROM").unwrap_or_else(|| "quotes@localhost".to_string()),
            ..MailerConfig::default()
        };

        let crawler = CrawlerSettings {
            poll_interval: Duration::from_secs(parsed("CRAWLER_POLL_INTERVAL_SECS", 10u64)?),
            job_timeout_minutes: parsed("CRAWLER_JOB_TIMEOUT_MINUTES", 30i64)?,
            targets: match var("CRAWLER_TARGETS") {
                Some(raw) => parse_targets(&raw)?,
                None => Vec::new(),
            },
            ..CrawlerSettings::default()
        };

        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parsed("PORT", 3000u16)?,
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:quotecrawler.db".to_string()),
            stripe,
            square,
            mailer,
            crawler_enabled: parsed("CRAWLER_ENABLED", true)?,
            crawler,
            pro_price_cents: parsed("PLAN_PRICE_PRO_CENTS", 2_900i64)?,
            enterprise_price_cents: parsed("PLAN_PRICE_ENTERPRISE_CENTS", 9_900i64)?,
            checkout_success_url: var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|| "http://localhost:3000/billing/success".to_string()),
            checkout_cancel_url: var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|| "http://localhost:3000/billing/cancel".to_string()),
        })
    }
}

/// `CRAWLER_TARGETS` is `vendor=url|url;vendor2=url`.
pub fn parse_targets(raw: &str) -> Result<Vec<CrawlTarget>, ConfigError> {
    let mut targets = Vec::new();
    for entry in raw.split(';').filter(|e| !e.trim().is_empty()) {
        let (vendor, urls) = entry.split_once('=').ok_or_else(|| ConfigError::Invalid {
            var: "CRAWLER_TARGETS",
            message: format!("expected vendor=url in '{entry}'"),
        })?;
        let page_urls: Vec<String> = urls
            .split('|')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        if page_urls.is_empty() {
            return Err(ConfigError::Invalid {
                var: "CRAWLER_TARGETS",
                message: format!("no urls for vendor '{vendor}'"),
            });
        }
        targets.push(CrawlTarget {
            vendor: vendor.trim().to_string(),
            page_urls,
        });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_vendor_targets() {
        let targets = parse_targets(
            "acme-solar=https://acme.example/panels|https://acme.example/inverters;voltify=https://voltify.example/catalog",
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].vendor, "acme-solar");
        assert_eq!(targets[0].page_urls.len(), 2);
        assert_eq!(targets[1].vendor, "voltify");
        assert_eq!(targets[1].page_urls, vec!["https://voltify.example/catalog"]);
    }

    #[test]
    fn rejects_malformed_targets() {
        assert!(parse_targets("no-equals-sign").is_err());
        assert!(parse_targets("vendor=").is_err());
        assert!(parse_targets("").unwrap().is_empty());
    }
}

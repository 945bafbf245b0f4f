pub mod companies;
pub mod crawler;
pub mod customers;
pub mod health;
pub mod integrations;
pub mod products;
pub mod quotes;
pub mod subscriptions;
pub mod webhooks;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::ApiError;

/// First instant of the current UTC month, for monthly quota windows.
pub(crate) fn month_start() -> Result<DateTime<Utc>, ApiError> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .ok_or_else(|| ApiError::Internal("could not compute month start".to_string()))
}

/// Midnight UTC today, for daily quota windows.
pub(crate) fn day_start() -> Result<DateTime<Utc>, ApiError> {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .ok_or_else(|| ApiError::Internal("could not compute day start".to_string()))
}

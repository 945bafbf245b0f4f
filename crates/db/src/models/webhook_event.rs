use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

use super::subscription::PaymentProvider;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "webhook_event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WebhookEventStatus {
    #[default]
    Received,
    Processed,
    Ignored,
    Failed,
}

/// Idempotency ledger for provider deliveries. One row per
/// `(provider, event_id)`; redeliveries never insert a second row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: WebhookEventStatus,
    pub error_message: Option<String>,
    pub received_at: DateTime<Utc>,
}

const EVENT_COLUMNS: &str =
    "id, provider, event_id, event_type, payload, status, error_message, received_at";

impl WebhookEvent {
    /// Record the delivery. Returns `None` when the event was already seen,
    /// which callers treat as a replay to acknowledge without re-applying.
    pub async fn try_insert(
        pool: &SqlitePool,
        provider: PaymentProvider,
        event_id: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "INSERT INTO webhook_events (id, provider, event_id, event_type, payload)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (provider, event_id) DO NOTHING
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_provider_event(
        pool: &SqlitePool,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE provider = $1 AND event_id = $2"
        ))
        .bind(provider)
        .bind(event_id)
        .fetch_optional(pool)
        .await
    }

    /// Re-arm a failed delivery so the provider's redelivery gets another
    /// attempt at applying it.
    pub async fn reset_for_retry(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'received', error_message = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_status(
        pool: &SqlitePool,
        id: Uuid,
        status: WebhookEventStatus,
        error_message: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE webhook_events SET status = $2, error_message = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(error_message)
            .execute(pool)
            .await?;
        Ok(())
    }

}

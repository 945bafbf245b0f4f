use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

use super::subscription::PaymentProvider;

/// A tenant's stored credential for one payment provider. Token exchange
/// happens out of band; the connect endpoint stores the result.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct PaymentConnection {
    pub id: Uuid,
    pub company_id: Uuid,
    pub provider: PaymentProvider,
    pub merchant_id: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreatePaymentConnection {
    pub merchant_id: Option<String>,
    pub access_token: String,
}

const CONNECTION_COLUMNS: &str =
    "id, company_id, provider, merchant_id, access_token, created_at, updated_at";

impl PaymentConnection {
    pub async fn upsert(
        pool: &SqlitePool,
        company_id: Uuid,
        provider: PaymentProvider,
        data: &CreatePaymentConnection,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PaymentConnection>(&format!(
            "INSERT INTO payment_connections (id, company_id, provider, merchant_id, access_token)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (company_id, provider) DO UPDATE SET
                 merchant_id = excluded.merchant_id,
                 access_token = excluded.access_token,
                 updated_at = datetime('now', 'subsec')
             RETURNING {CONNECTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(provider)
        .bind(&data.merchant_id)
        .bind(&data.access_token)
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PaymentConnection>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM payment_connections
             WHERE company_id = $1 AND provider = $2"
        ))
        .bind(company_id)
        .bind(provider)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, PaymentConnection>(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM payment_connections
             WHERE company_id = $1
             ORDER BY provider ASC"
        ))
        .bind(company_id)
        .fetch_all(pool)
        .await
    }

    pub async fn delete(
        pool: &SqlitePool,
        company_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM payment_connections WHERE company_id = $1 AND provider = $2")
                .bind(company_id)
                .bind(provider)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Customer {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateCustomer {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
pub struct UpdateCustomer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

const CUSTOMER_COLUMNS: &str =
    "id, company_id, name, email, phone, address, notes, created_at, updated_at";

impl Customer {
    pub async fn create(
        pool: &SqlitePool,
        company_id: Uuid,
        data: &CreateCustomer,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Customer>(&format!(
            "INSERT INTO customers (id, company_id, name, email, phone, address, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.notes)
        .fetch_one(pool)
        .await
    }

    /// Lookups are always scoped to the tenant; a foreign id behaves like a miss.
    pub async fn find_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE id = $1 AND company_id = $2"
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers
             WHERE company_id = $1
             ORDER BY name COLLATE NOCASE ASC"
        ))
        .bind(company_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
        data: &UpdateCustomer,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Customer>(&format!(
            "UPDATE customers
             SET name = COALESCE($3, name),
                 email = COALESCE($4, email),
                 phone = COALESCE($5, phone),
                 address = COALESCE($6, address),
                 notes = COALESCE($7, notes),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND company_id = $2
             RETURNING {CUSTOMER_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(&data.name)
        .bind(&data.email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.notes)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM customers WHERE id = $1 AND company_id = $2")
            .bind(id)
            .bind(company_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM customers WHERE company_id = $1")
            .bind(company_id)
            .fetch_one(pool)
            .await
    }
}

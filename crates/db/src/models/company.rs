use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// A reseller tenant. Every other row in the database hangs off one of these.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub contact_email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub quote_terms: Option<String>,
    pub default_tax_rate_bps: i64,
    pub currency: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateCompany {
    pub name: String,
    pub slug: Option<String>,
    pub contact_email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub quote_terms: Option<String>,
    pub default_tax_rate_bps: Option<i64>,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
pub struct UpdateCompany {
    pub name: Option<String>,
    pub contact_email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub quote_terms: Option<String>,
    pub default_tax_rate_bps: Option<i64>,
    pub currency: Option<String>,
}

/// Lowercase, alphanumeric runs joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash_pending = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if dash_pending && !slug.is_empty() {
                slug.push('-');
            }
            dash_pending = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            dash_pending = true;
        }
    }
    slug
}

fn generate_api_key() -> String {
    format!("qc_{}", Uuid::new_v4().simple())
}

const COMPANY_COLUMNS: &str = "id, name, slug, contact_email, phone, address, website, logo_url, \
     quote_terms, default_tax_rate_bps, currency, api_key, created_at, updated_at";

impl Company {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateCompany,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let slug = data
            .slug
            .clone()
            .unwrap_or_else(|| slugify(&data.name));
        let api_key = generate_api_key();
        let tax_rate = data.default_tax_rate_bps.unwrap_or(0);
        let currency = data.currency.clone().unwrap_or_else(|| "USD".to_string());

        sqlx::query_as::<_, Company>(&format!(
            "INSERT INTO companies (id, name, slug, contact_email, phone, address, website, quote_terms, default_tax_rate_bps, currency, api_key)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(id)
        .bind(&data.name)
        .bind(&slug)
        .bind(&data.contact_email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.website)
        .bind(&data.quote_terms)
        .bind(tax_rate)
        .bind(&currency)
        .bind(&api_key)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_api_key(
        pool: &SqlitePool,
        api_key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE api_key = $1"
        ))
        .bind(api_key)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE slug = $1"
        ))
        .bind(slug)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        data: &UpdateCompany,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!(
            "UPDATE companies
             SET name = COALESCE($2, name),
                 contact_email = COALESCE($3, contact_email),
                 phone = COALESCE($4, phone),
                 address = COALESCE($5, address),
                 website = COALESCE($6, website),
                 logo_url = COALESCE($7, logo_url),
                 quote_terms = COALESCE($8, quote_terms),
                 default_tax_rate_bps = COALESCE($9, default_tax_rate_bps),
                 currency = COALESCE($10, currency),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1
             RETURNING {COMPANY_COLUMNS}"
        ))
        .bind(id)
        .bind(&data.name)
        .bind(&data.contact_email)
        .bind(&data.phone)
        .bind(&data.address)
        .bind(&data.website)
        .bind(&data.logo_url)
        .bind(&data.quote_terms)
        .bind(data.default_tax_rate_bps)
        .bind(&data.currency)
        .fetch_one(pool)
        .await
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM companies WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Sunbeam Solar, Inc."), "sunbeam-solar-inc");
        assert_eq!(slugify("  ACME  "), "acme");
        assert_eq!(slugify("a--b"), "a-b");
    }

    #[test]
    fn api_keys_are_prefixed_and_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with("qc_"));
        assert_ne!(a, b);
    }
}

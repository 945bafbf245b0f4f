use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "product_category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductCategory {
    Panel,
    Inverter,
    Battery,
    Racking,
    Monitoring,
    #[default]
    Accessory,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Product {
    pub id: Uuid,
    pub company_id: Uuid,
    pub vendor: String,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit_price_cents: i64,
    pub currency: String,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub specs: Option<String>, // JSON-serialized vendor spec sheet
    pub active: bool,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn parsed_specs(&self) -> Option<serde_json::Value> {
        self.specs.as_ref().and_then(|json| serde_json::from_str(json).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateProduct {
    pub vendor: Option<String>,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit_price_cents: i64,
    pub currency: Option<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub specs: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ProductCategory>,
    pub unit_price_cents: Option<i64>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub specs: Option<serde_json::Value>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct ProductFilter {
    pub category: Option<ProductCategory>,
    pub active: Option<bool>,
    pub vendor: Option<String>,
    pub search: Option<String>,
}

/// Catalog data extracted from one vendor page by the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlProductData {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: ProductCategory,
    pub unit_price_cents: i64,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
}

/// What a crawl upsert did to the catalog row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

const PRODUCT_COLUMNS: &str = "id, company_id, vendor, sku, name, description, category, \
     unit_price_cents, currency, image_url, source_url, specs, active, last_crawled_at, \
     created_at, updated_at";

impl Product {
    pub async fn create(
        pool: &SqlitePool,
        company_id: Uuid,
        data: &CreateProduct,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let vendor = data.vendor.clone().unwrap_or_else(|| "manual".to_string());
        let currency = data.currency.clone().unwrap_or_else(|| "USD".to_string());
        let specs = data.specs.as_ref().map(|v| v.to_string());

        sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products (id, company_id, vendor, sku, name, description, category, unit_price_cents, currency, image_url, source_url, specs)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(&vendor)
        .bind(&data.sku)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.category)
        .bind(data.unit_price_cents)
        .bind(&currency)
        .bind(&data.image_url)
        .bind(&data.source_url)
        .bind(&specs)
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND company_id = $2"
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        filter: &ProductFilter,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE company_id = "
        ));
        builder.push_bind(company_id);

        if let Some(category) = filter.category {
            builder.push(" AND category = ").push_bind(category);
        }
        if let Some(active) = filter.active {
            builder.push(" AND active = ").push_bind(active);
        }
        if let Some(vendor) = &filter.vendor {
            builder.push(" AND vendor = ").push_bind(vendor.clone());
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search);
            builder
                .push(" AND (name LIKE ")
                .push_bind(pattern.clone())
                .push(" OR sku LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        builder.push(" ORDER BY name COLLATE NOCASE ASC");

        builder.build_query_as::<Product>().fetch_all(pool).await
    }

    pub async fn update(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
        data: &UpdateProduct,
    ) -> Result<Option<Self>, sqlx::Error> {
        let specs = data.specs.as_ref().map(|v| v.to_string());

        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products
             SET name = COALESCE($3, name),
                 description = COALESCE($4, description),
                 category = COALESCE($5, category),
                 unit_price_cents = COALESCE($6, unit_price_cents),
                 image_url = COALESCE($7, image_url),
                 source_url = COALESCE($8, source_url),
                 specs = COALESCE($9, specs),
                 active = COALESCE($10, active),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND company_id = $2
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(&data.name)
        .bind(&data.description)
        .bind(data.category)
        .bind(data.unit_price_cents)
        .bind(&data.image_url)
        .bind(&data.source_url)
        .bind(&specs)
        .bind(data.active)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND company_id = $2")
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
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products WHERE company_id = $1")
            .bind(company_id)
            .fetch_one(pool)
            .await
    }

    /// Insert or refresh one crawled catalog row. `last_crawled_at` is touched
    /// either way; the outcome distinguishes new rows from price/name changes.
    pub async fn upsert_from_crawl(
        pool: &SqlitePool,
        company_id: Uuid,
        vendor: &str,
        data: &CrawlProductData,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let existing = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products
             WHERE company_id = $1 AND vendor = $2 AND sku = $3"
        ))
        .bind(company_id)
        .bind(vendor)
        .bind(&data.sku)
        .fetch_optional(pool)
        .await?;

        match existing {
            None => {
                sqlx::query(
                    "INSERT INTO products (id, company_id, vendor, sku, name, description, category, unit_price_cents, image_url, source_url, last_crawled_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, datetime('now', 'subsec'))",
                )
                .bind(Uuid::new_v4())
                .bind(company_id)
                .bind(vendor)
                .bind(&data.sku)
                .bind(&data.name)
                .bind(&data.description)
                .bind(data.category)
                .bind(data.unit_price_cents)
                .bind(&data.image_url)
                .bind(&data.source_url)
                .execute(pool)
                .await?;
                Ok(UpsertOutcome::Created)
            }
            Some(existing) => {
                let changed = existing.unit_price_cents != data.unit_price_cents
                    || existing.name != data.name;
                sqlx::query(
                    "UPDATE products
                     SET name = $2,
                         description = COALESCE($3, description),
                         unit_price_cents = $4,
                         image_url = COALESCE($5, image_url),
                         source_url = COALESCE($6, source_url),
                         last_crawled_at = datetime('now', 'subsec'),
                         updated_at = datetime('now', 'subsec')
                     WHERE id = $1",
                )
                .bind(existing.id)
                .bind(&data.name)
                .bind(&data.description)
                .bind(data.unit_price_cents)
                .bind(&data.image_url)
                .bind(&data.source_url)
                .execute(pool)
                .await?;
                Ok(if changed {
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                })
            }
        }
    }
}

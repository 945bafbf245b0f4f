use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "quote_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Viewed,
    Accepted,
    Declined,
    Expired,
}

impl QuoteStatus {
    /// The enforced lifecycle. `accepted` and `declined` are terminal;
    /// `expired` can only be reached from an outstanding quote.
    pub fn can_transition_to(self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;
        matches!(
            (self, next),
            (Draft, Sent)
                | (Sent, Viewed)
                | (Sent, Accepted)
                | (Sent, Declined)
                | (Sent, Expired)
                | (Viewed, Accepted)
                | (Viewed, Declined)
                | (Viewed, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QuoteStatus::Accepted | QuoteStatus::Declined)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Quote {
    pub id: Uuid,
    pub company_id: Uuid,
    pub customer_id: Uuid,
    pub number_seq: i64,
    pub quote_number: String,
    pub status: QuoteStatus,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub tax_rate_bps: i64,
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub viewed_at: Option<DateTime<Utc>>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct QuoteItem {
    pub id: Uuid,
    pub quote_id: Uuid,
    pub product_id: Option<Uuid>,
    pub description: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct QuoteWithItems {
    #[serde(flatten)]
    #[ts(flatten)]
    pub quote: Quote,
    pub items: Vec<QuoteItem>,
}

impl std::ops::Deref for QuoteWithItems {
    type Target = Quote;
    fn deref(&self) -> &Self::Target {
        &self.quote
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateQuoteItem {
    pub product_id: Option<Uuid>,
    pub description: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateQuote {
    pub customer_id: Uuid,
    pub items: Vec<CreateQuoteItem>,
    pub discount_cents: Option<i64>,
    pub shipping_cents: Option<i64>,
    pub tax_rate_bps: Option<i64>,
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpdateQuote {
    pub customer_id: Option<Uuid>,
    pub items: Option<Vec<CreateQuoteItem>>,
    pub discount_cents: Option<i64>,
    pub shipping_cents: Option<i64>,
    pub tax_rate_bps: Option<i64>,
    pub notes: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

const QUOTE_COLUMNS: &str = "id, company_id, customer_id, number_seq, quote_number, status, \
     discount_cents, shipping_cents, tax_rate_bps, notes, valid_until, sent_at, viewed_at, \
     responded_at, created_at, updated_at";

const ITEM_COLUMNS: &str =
    "id, quote_id, product_id, description, unit_price_cents, quantity, position";

impl Quote {
    /// Create the quote and its items in one transaction, allocating the next
    /// per-company quote number.
    pub async fn create(
        pool: &SqlitePool,
        company_id: Uuid,
        data: &CreateQuote,
        id: Uuid,
        default_tax_rate_bps: i64,
    ) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let seq: i64 = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(number_seq), 0) + 1 FROM quotes WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_one(&mut *tx)
        .await?;

        let quote_number = format!("Q-{seq:05}");
        let tax_rate = data.tax_rate_bps.unwrap_or(default_tax_rate_bps);

        let quote = sqlx::query_as::<_, Quote>(&format!(
            "INSERT INTO quotes (id, company_id, customer_id, number_seq, quote_number, discount_cents, shipping_cents, tax_rate_bps, notes, valid_until)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {QUOTE_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(data.customer_id)
        .bind(seq)
        .bind(&quote_number)
        .bind(data.discount_cents.unwrap_or(0))
        .bind(data.shipping_cents.unwrap_or(0))
        .bind(tax_rate)
        .bind(&data.notes)
        .bind(data.valid_until)
        .fetch_one(&mut *tx)
        .await?;

        for (position, item) in data.items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO quote_items (id, quote_id, product_id, description, unit_price_cents, quantity, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(quote.id)
            .bind(item.product_id)
            .bind(&item.description)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(quote)
    }

    pub async fn find_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = $1 AND company_id = $2"
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_with_items(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<QuoteWithItems>, sqlx::Error> {
        let Some(quote) = Self::find_for_company(pool, company_id, id).await? else {
            return Ok(None);
        };
        let items = Self::items(pool, quote.id).await?;
        Ok(Some(QuoteWithItems { quote, items }))
    }

    pub async fn items(pool: &SqlitePool, quote_id: Uuid) -> Result<Vec<QuoteItem>, sqlx::Error> {
        sqlx::query_as::<_, QuoteItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM quote_items WHERE quote_id = $1 ORDER BY position ASC"
        ))
        .bind(quote_id)
        .fetch_all(pool)
        .await
    }

    pub async fn list_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        status: Option<QuoteStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        match status {
            Some(status) => {
                sqlx::query_as::<_, Quote>(&format!(
                    "SELECT {QUOTE_COLUMNS} FROM quotes
                     WHERE company_id = $1 AND status = $2
                     ORDER BY created_at DESC"
                ))
                .bind(company_id)
                .bind(status)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Quote>(&format!(
                    "SELECT {QUOTE_COLUMNS} FROM quotes
                     WHERE company_id = $1
                     ORDER BY created_at DESC"
                ))
                .bind(company_id)
                .fetch_all(pool)
                .await
            }
        }
    }

    /// Rewrite quote fields and replace its items. Callers enforce that the
    /// quote is still a draft.
    pub async fn update(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
        data: &UpdateQuote,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let quote = sqlx::query_as::<_, Quote>(&format!(
            "UPDATE quotes
             SET customer_id = COALESCE($3, customer_id),
                 discount_cents = COALESCE($4, discount_cents),
                 shipping_cents = COALESCE($5, shipping_cents),
                 tax_rate_bps = COALESCE($6, tax_rate_bps),
                 notes = COALESCE($7, notes),
                 valid_until = COALESCE($8, valid_until),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND company_id = $2
             RETURNING {QUOTE_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(data.customer_id)
        .bind(data.discount_cents)
        .bind(data.shipping_cents)
        .bind(data.tax_rate_bps)
        .bind(&data.notes)
        .bind(data.valid_until)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(quote) = quote else {
            return Ok(None);
        };

        if let Some(items) = &data.items {
            sqlx::query("DELETE FROM quote_items WHERE quote_id = $1")
                .bind(quote.id)
                .execute(&mut *tx)
                .await?;
            for (position, item) in items.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO quote_items (id, quote_id, product_id, description, unit_price_cents, quantity, position)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(Uuid::new_v4())
                .bind(quote.id)
                .bind(item.product_id)
                .bind(&item.description)
                .bind(item.unit_price_cents)
                .bind(item.quantity)
                .bind(position as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(Some(quote))
    }

    /// Raw status write. Stamps the matching lifecycle timestamp the first
    /// time each stage is reached. Legality is checked by the quote service.
    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: QuoteStatus,
    ) -> Result<(), sqlx::Error> {
        let stamp_column = match status {
            QuoteStatus::Sent => Some("sent_at"),
            QuoteStatus::Viewed => Some("viewed_at"),
            QuoteStatus::Accepted | QuoteStatus::Declined => Some("responded_at"),
            QuoteStatus::Draft | QuoteStatus::Expired => None,
        };

        match stamp_column {
            Some(column) => {
                sqlx::query(&format!(
                    "UPDATE quotes
                     SET status = $2,
                         {column} = COALESCE({column}, datetime('now', 'subsec')),
                         updated_at = datetime('now', 'subsec')
                     WHERE id = $1"
                ))
                .bind(id)
                .bind(status)
                .execute(pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE quotes SET status = $2, updated_at = datetime('now', 'subsec') WHERE id = $1",
                )
                .bind(id)
                .bind(status)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn delete(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM quotes WHERE id = $1 AND company_id = $2")
            .bind(id)
            .bind(company_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_created_since(
        pool: &SqlitePool,
        company_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM quotes WHERE company_id = $1 AND datetime(created_at) >= datetime($2)",
        )
        .bind(company_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }

    /// Sweep outstanding quotes whose validity window has passed.
    pub async fn expire_overdue(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE quotes
             SET status = 'expired', updated_at = datetime('now', 'subsec')
             WHERE status IN ('sent', 'viewed')
               AND valid_until IS NOT NULL
               AND datetime(valid_until) < datetime('now')",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_permits_forward_motion_only() {
        use QuoteStatus::*;
        assert!(Draft.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Viewed));
        assert!(Sent.can_transition_to(Accepted));
        assert!(Viewed.can_transition_to(Declined));
        assert!(Viewed.can_transition_to(Expired));

        assert!(!Draft.can_transition_to(Accepted));
        assert!(!Draft.can_transition_to(Viewed));
        assert!(!Sent.can_transition_to(Draft));
        assert!(!Accepted.can_transition_to(Declined));
        assert!(!Declined.can_transition_to(Sent));
        assert!(!Expired.can_transition_to(Accepted));
    }

    #[test]
    fn terminal_states() {
        assert!(QuoteStatus::Accepted.is_terminal());
        assert!(QuoteStatus::Declined.is_terminal());
        assert!(!QuoteStatus::Expired.is_terminal());
        assert!(!QuoteStatus::Sent.is_terminal());
    }
}

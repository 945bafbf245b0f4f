use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "crawl_job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CrawlJobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

/// One requested catalog refresh. The crawler worker claims pending jobs and
/// writes progress counters back as it walks the vendor's pages.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CrawlJob {
    pub id: Uuid,
    pub company_id: Uuid,
    pub vendor: String,
    pub status: CrawlJobStatus,
    pub pages_fetched: i64,
    pub products_found: i64,
    pub products_created: i64,
    pub products_updated: i64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, company_id, vendor, status, pages_fetched, products_found, \
     products_created, products_updated, error_message, started_at, finished_at, created_at, \
     updated_at";

impl CrawlJob {
    pub async fn create(
        pool: &SqlitePool,
        company_id: Uuid,
        vendor: &str,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, CrawlJob>(&format!(
            "INSERT INTO crawl_jobs (id, company_id, vendor)
             VALUES ($1, $2, $3)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(company_id)
        .bind(vendor)
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = $1 AND company_id = $2"
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_for_company(
        pool: &SqlitePool,
        company_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs
             WHERE company_id = $1
             ORDER BY created_at DESC
             LIMIT $2"
        ))
        .bind(company_id)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Atomically move the oldest pending job to running and hand it to the
    /// worker. Returns `None` when the queue is empty.
    pub async fn claim_next_pending(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CrawlJob>(&format!(
            "UPDATE crawl_jobs
             SET status = 'running',
                 started_at = datetime('now', 'subsec'),
                 updated_at = datetime('now', 'subsec')
             WHERE id = (
                 SELECT id FROM crawl_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .fetch_optional(pool)
        .await
    }

    pub async fn record_progress(
        pool: &SqlitePool,
        id: Uuid,
        pages_fetched: i64,
        products_found: i64,
        products_created: i64,
        products_updated: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE crawl_jobs
             SET pages_fetched = $2,
                 products_found = $3,
                 products_created = $4,
                 products_updated = $5,
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1",
        )
        .bind(id)
        .bind(pages_fetched)
        .bind(products_found)
        .bind(products_created)
        .bind(products_updated)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_completed(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE crawl_jobs
             SET status = 'completed',
                 finished_at = datetime('now', 'subsec'),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE crawl_jobs
             SET status = 'failed',
                 error_message = $2,
                 finished_at = datetime('now', 'subsec'),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Cancel a job that has not finished. Returns false when the job was
    /// already terminal (or not this tenant's).
    pub async fn cancel(
        pool: &SqlitePool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE crawl_jobs
             SET status = 'canceled',
                 finished_at = datetime('now', 'subsec'),
                 updated_at = datetime('now', 'subsec')
             WHERE id = $1 AND company_id = $2 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(company_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_created_since(
        pool: &SqlitePool,
        company_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM crawl_jobs WHERE company_id = $1 AND datetime(created_at) >= datetime($2)",
        )
        .bind(company_id)
        .bind(since)
        .fetch_one(pool)
        .await
    }

    /// Jobs stuck in running longer than the timeout, oldest first.
    pub async fn find_stalled(
        pool: &SqlitePool,
        timeout_minutes: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let timeout_str = format!("-{timeout_minutes} minutes");
        sqlx::query_as::<_, CrawlJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs
             WHERE status = 'running'
               AND started_at IS NOT NULL
               AND datetime(started_at) < datetime('now', $1)
             ORDER BY started_at ASC"
        ))
        .bind(timeout_str)
        .fetch_all(pool)
        .await
    }
}

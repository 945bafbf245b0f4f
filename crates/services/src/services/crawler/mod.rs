//! Background worker that refreshes vendor catalogs.
//!
//! Jobs are queued as `crawl_jobs` rows by the API; this service claims the
//! oldest pending job each tick, walks the vendor's configured pages with
//! retry/backoff and a polite delay, and upserts extracted products into the
//! tenant's catalog. Jobs stuck in running are failed by a reaper so a dead
//! worker never wedges the queue.

pub mod html;

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use db::{
    DBService,
    models::{
        crawl_job::{CrawlJob, CrawlJobStatus},
        product::{Product, UpsertOutcome},
    },
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("network error: {0}")]
    Transport(String),
    #[error("timeout fetching {0}")]
    Timeout(String),
    #[error("http {status} from {url}")]
    Http { status: u16, url: String },
    #[error("no crawl target configured for vendor '{0}'")]
    UnknownVendor(String),
}

impl CrawlerError {
    fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

/// One vendor's catalog pages, from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlTarget {
    pub vendor: String,
    pub page_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CrawlerSettings {
    pub poll_interval: Duration,
    pub page_delay: Duration,
    pub job_timeout_minutes: i64,
    pub targets: Vec<CrawlTarget>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            page_delay: Duration::from_millis(500),
            job_timeout_minutes: 30,
            targets: Vec::new(),
        }
    }
}

pub struct CrawlerService {
    db: DBService,
    http: Client,
    settings: CrawlerSettings,
}

impl CrawlerService {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(db: DBService, settings: CrawlerSettings) -> Result<Self, CrawlerError> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("quotecrawler/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CrawlerError::Transport(e.to_string()))?;

        Ok(Self { db, http, settings })
    }

    pub fn target_for(&self, vendor: &str) -> Option<&CrawlTarget> {
        self.settings.targets.iter().find(|t| t.vendor == vendor)
    }

    /// Spawn the background crawl worker.
    pub async fn spawn(db: DBService, settings: CrawlerSettings) -> tokio::task::JoinHandle<()> {
        let service = match Self::new(db, settings) {
            Ok(service) => service,
            Err(e) => {
                error!("Crawler service failed to start: {}", e);
                return tokio::spawn(async {});
            }
        };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting crawler service with interval {:?}, {} vendor targets",
            self.settings.poll_interval,
            self.settings.targets.len()
        );

        let mut interval = interval(self.settings.poll_interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.reap_stalled_jobs().await {
                error!("Error reaping stalled crawl jobs: {}", e);
            }
            if let Err(e) = self.run_next_job().await {
                error!("Error running crawl job: {}", e);
            }
        }
    }

    /// Fail running jobs whose worker never finished.
    async fn reap_stalled_jobs(&self) -> Result<(), CrawlerError> {
        let stalled =
            CrawlJob::find_stalled(&self.db.pool, self.settings.job_timeout_minutes).await?;
        for job in stalled {
            warn!(
                job_id = %job.id,
                vendor = %job.vendor,
                started_at = ?job.started_at,
                "Crawl job stalled, marking failed"
            );
            CrawlJob::mark_failed(
                &self.db.pool,
                job.id,
                &format!(
                    "job exceeded the {} minute timeout",
                    self.settings.job_timeout_minutes
                ),
            )
            .await?;
        }
        Ok(())
    }

    /// Claim and run at most one job per tick.
    async fn run_next_job(&self) -> Result<(), CrawlerError> {
        let Some(job) = CrawlJob::claim_next_pending(&self.db.pool).await? else {
            debug!("Crawler: no pending jobs");
            return Ok(());
        };

        info!(job_id = %job.id, vendor = %job.vendor, "Crawler: starting job");

        match self.run_job(&job).await {
            Ok(()) => {
                CrawlJob::mark_completed(&self.db.pool, job.id).await?;
                info!(job_id = %job.id, "Crawler: job completed");
            }
            Err(e) => {
                CrawlJob::mark_failed(&self.db.pool, job.id, &e.to_string()).await?;
                warn!(job_id = %job.id, error = %e, "Crawler: job failed");
            }
        }
        Ok(())
    }

    async fn run_job(&self, job: &CrawlJob) -> Result<(), CrawlerError> {
        let target = self
            .target_for(&job.vendor)
            .ok_or_else(|| CrawlerError::UnknownVendor(job.vendor.clone()))?
            .clone();

        let mut pages_fetched = 0i64;
        let mut products_found = 0i64;
        let mut products_created = 0i64;
        let mut products_updated = 0i64;

        for url in &target.page_urls {
            // Cancellation lands in the database; honor it between pages.
            if let Some(current) = CrawlJob::find_by_id(&self.db.pool, job.id).await? {
                if current.status == CrawlJobStatus::Canceled {
                    info!(job_id = %job.id, "Crawler: job canceled, stopping");
                    return Ok(());
                }
            }

            let body = self.fetch_page(url).await?;
            pages_fetched += 1;

            let extracted = html::extract_products(&body, url);
            products_found += extracted.len() as i64;

            for product in &extracted {
                let outcome = Product::upsert_from_crawl(
                    &self.db.pool,
                    job.company_id,
                    &job.vendor,
                    product,
                )
                .await?;
                match outcome {
                    UpsertOutcome::Created => products_created += 1,
                    UpsertOutcome::Updated => products_updated += 1,
                    UpsertOutcome::Unchanged => {}
                }
            }

            CrawlJob::record_progress(
                &self.db.pool,
                job.id,
                pages_fetched,
                products_found,
                products_created,
                products_updated,
            )
            .await?;

            tokio::time::sleep(self.settings.page_delay).await;
        }

        Ok(())
    }

    async fn fetch_page(&self, url: &str) -> Result<String, CrawlerError> {
        (|| async { self.fetch_once(url).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(30))
                    .with_max_times(3)
                    .with_jitter(),
            )
            .when(|e: &CrawlerError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Crawler fetch failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn fetch_once(&self, url: &str) -> Result<String, CrawlerError> {
        let res = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlerError::Timeout(url.to_string())
            } else {
                CrawlerError::Transport(e.to_string())
            }
        })?;

        match res.status() {
            s if s.is_success() => res
                .text()
                .await
                .map_err(|e| CrawlerError::Transport(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(CrawlerError::Http {
                status: 429,
                url: url.to_string(),
            }),
            s => Err(CrawlerError::Http {
                status: s.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::company::{Company, CreateCompany};
    use uuid::Uuid;

    async fn setup() -> (DBService, Company) {
        let db = DBService::new_in_memory().await.unwrap();
        let company = Company::create(
            &db.pool,
            &CreateCompany {
                name: "Crawl Co".to_string(),
                slug: None,
                contact_email: "c@example.com".to_string(),
                phone: None,
                address: None,
                website: None,
                quote_terms: None,
                default_tax_rate_bps: None,
                currency: None,
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap();
        (db, company)
    }

    #[tokio::test]
    async fn claim_moves_oldest_pending_to_running() {
        let (db, company) = setup().await;
        let first = CrawlJob::create(&db.pool, company.id, "acme-solar", Uuid::new_v4())
            .await
            .unwrap();
        CrawlJob::create(&db.pool, company.id, "other-vendor", Uuid::new_v4())
            .await
            .unwrap();

        let claimed = CrawlJob::claim_next_pending(&db.pool).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, CrawlJobStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn cancel_only_touches_unfinished_jobs() {
        let (db, company) = setup().await;
        let job = CrawlJob::create(&db.pool, company.id, "acme-solar", Uuid::new_v4())
            .await
            .unwrap();

        assert!(CrawlJob::cancel(&db.pool, company.id, job.id).await.unwrap());
        // Already canceled: a second cancel is a no-op.
        assert!(!CrawlJob::cancel(&db.pool, company.id, job.id).await.unwrap());

        let job = CrawlJob::find_by_id(&db.pool, job.id).await.unwrap().unwrap();
        assert_eq!(job.status, CrawlJobStatus::Canceled);
    }

    #[tokio::test]
    async fn unknown_vendor_fails_the_job() {
        let (db, company) = setup().await;
        let service = CrawlerService::new(db.clone(), CrawlerSettings::default()).unwrap();
        CrawlJob::create(&db.pool, company.id, "nobody", Uuid::new_v4())
            .await
            .unwrap();

        service.run_next_job().await.unwrap();

        let jobs = CrawlJob::list_for_company(&db.pool, company.id, 10).await.unwrap();
        assert_eq!(jobs[0].status, CrawlJobStatus::Failed);
        assert!(jobs[0].error_message.as_deref().unwrap().contains("nobody"));
    }
}

//! Quote domain service: creation with shared pricing, the enforced status
//! lifecycle, sending, and the expiry sweeper.

use std::time::Duration;

use db::{
    DBService,
    models::{
        company::Company,
        customer::Customer,
        quote::{CreateQuote, CreateQuoteItem, Quote, QuoteStatus, QuoteWithItems, UpdateQuote},
    },
};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{
    mailer::{Mailer, MailerError},
    pricing::{self, PricingError, QuoteTotals},
    render::{self, RenderError},
};

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Pricing(#[from] PricingError),
    #[error("customer not found")]
    CustomerNotFound,
    #[error("quote not found")]
    QuoteNotFound,
    #[error("only draft quotes can be edited (status is {0})")]
    NotEditable(QuoteStatus),
    #[error("cannot move quote from {from} to {to}")]
    IllegalTransition { from: QuoteStatus, to: QuoteStatus },
    #[error("customer has no email address")]
    CustomerHasNoEmail,
    #[error("mail error: {0}")]
    Mailer(#[from] MailerError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct QuoteService;

impl QuoteService {
    /// Create a quote for a customer of this company. Pricing is validated
    /// before anything is written.
    pub async fn create(
        pool: &SqlitePool,
        company: &Company,
        data: &CreateQuote,
    ) -> Result<(QuoteWithItems, QuoteTotals), QuoteError> {
        Customer::find_for_company(pool, company.id, data.customer_id)
            .await?
            .ok_or(QuoteError::CustomerNotFound)?;

        let tax_rate = data.tax_rate_bps.unwrap_or(company.default_tax_rate_bps);
        let totals = pricing::compute_totals(
            &data.items,
            data.discount_cents.unwrap_or(0),
            data.shipping_cents.unwrap_or(0),
            tax_rate,
        )?;

        let quote =
            Quote::create(pool, company.id, data, Uuid::new_v4(), company.default_tax_rate_bps)
                .await?;
        let quote = Quote::find_with_items(pool, company.id, quote.id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;

        info!(
            company_id = %company.id,
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            total_cents = totals.total_cents,
            "Quote created"
        );

        Ok((quote, totals))
    }

    /// Recompute totals for a stored quote.
    pub fn totals(quote: &QuoteWithItems) -> Result<QuoteTotals, PricingError> {
        let items: Vec<CreateQuoteItem> = quote
            .items
            .iter()
            .map(|item| CreateQuoteItem {
                product_id: item.product_id,
                description: item.description.clone(),
                unit_price_cents: item.unit_price_cents,
                quantity: item.quantity,
            })
            .collect();
        pricing::compute_totals(
            &items,
            quote.discount_cents,
            quote.shipping_cents,
            quote.tax_rate_bps,
        )
    }

    /// Drafts only; edits after sending would silently change what the
    /// customer was shown.
    pub async fn update(
        pool: &SqlitePool,
        company: &Company,
        id: Uuid,
        data: &UpdateQuote,
    ) -> Result<(QuoteWithItems, QuoteTotals), QuoteError> {
        let existing = Quote::find_with_items(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;
        if existing.status != QuoteStatus::Draft {
            return Err(QuoteError::NotEditable(existing.status));
        }

        if let Some(customer_id) = data.customer_id {
            Customer::find_for_company(pool, company.id, customer_id)
                .await?
                .ok_or(QuoteError::CustomerNotFound)?;
        }

        // Validate the post-edit arithmetic before writing.
        let items = data
            .items
            .clone()
            .unwrap_or_else(|| {
                existing
                    .items
                    .iter()
                    .map(|item| CreateQuoteItem {
                        product_id: item.product_id,
                        description: item.description.clone(),
                        unit_price_cents: item.unit_price_cents,
                        quantity: item.quantity,
                    })
                    .collect()
            });
        let totals = pricing::compute_totals(
            &items,
            data.discount_cents.unwrap_or(existing.discount_cents),
            data.shipping_cents.unwrap_or(existing.shipping_cents),
            data.tax_rate_bps.unwrap_or(existing.tax_rate_bps),
        )?;

        Quote::update(pool, company.id, id, data)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;
        let quote = Quote::find_with_items(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;

        Ok((quote, totals))
    }

    /// Move a quote along the lifecycle, rejecting anything the transition
    /// graph does not allow.
    pub async fn transition(
        pool: &SqlitePool,
        company: &Company,
        id: Uuid,
        to: QuoteStatus,
    ) -> Result<Quote, QuoteError> {
        let quote = Quote::find_for_company(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;

        if !quote.status.can_transition_to(to) {
            return Err(QuoteError::IllegalTransition {
                from: quote.status,
                to,
            });
        }

        Quote::set_status(pool, quote.id, to).await?;
        Quote::find_for_company(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)
    }

    /// Render and email the quote to its customer. A draft becomes sent;
    /// a quote that is already out can be re-sent without a state change.
    pub async fn send(
        pool: &SqlitePool,
        company: &Company,
        id: Uuid,
        mailer: &Mailer,
        branded: bool,
    ) -> Result<Quote, QuoteError> {
        let quote = Quote::find_with_items(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;

        match quote.status {
            QuoteStatus::Draft | QuoteStatus::Sent => {}
            status => {
                return Err(QuoteError::IllegalTransition {
                    from: status,
                    to: QuoteStatus::Sent,
                });
            }
        }

        let customer = Customer::find_for_company(pool, company.id, quote.customer_id)
            .await?
            .ok_or(QuoteError::CustomerNotFound)?;
        let email = customer
            .email
            .clone()
            .ok_or(QuoteError::CustomerHasNoEmail)?;

        let totals = Self::totals(&quote)?;
        let document = render::render_quote_document(company, &customer, &quote, &totals, branded)?;
        let subject = format!("Quote {} from {}", quote.quote_number, company.name);
        mailer.send_html(&email, &subject, &document).await?;

        if quote.status == QuoteStatus::Draft {
            Quote::set_status(pool, quote.id, QuoteStatus::Sent).await?;
        }
        Quote::find_for_company(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)
    }

    /// The printable document for a quote.
    pub async fn document(
        pool: &SqlitePool,
        company: &Company,
        id: Uuid,
        branded: bool,
    ) -> Result<String, QuoteError> {
        let quote = Quote::find_with_items(pool, company.id, id)
            .await?
            .ok_or(QuoteError::QuoteNotFound)?;
        let customer = Customer::find_for_company(pool, company.id, quote.customer_id)
            .await?
            .ok_or(QuoteError::CustomerNotFound)?;
        let totals = Self::totals(&quote)?;
        Ok(render::render_quote_document(
            company, &customer, &quote, &totals, branded,
        )?)
    }
}

/// Background sweep that expires outstanding quotes past their validity date.
pub struct QuoteExpiryService {
    db: DBService,
    poll_interval: Duration,
}

impl QuoteExpiryService {
    pub async fn spawn(db: DBService) -> tokio::task::JoinHandle<()> {
        let service = Self {
            db,
            poll_interval: Duration::from_secs(3600),
        };
        tokio::spawn(async move {
            service.start().await;
        })
    }

    async fn start(&self) {
        info!(
            "Starting quote expiry service with interval {:?}",
            self.poll_interval
        );

        let mut interval = interval(self.poll_interval);

        loop {
            interval.tick().await;
            match Quote::expire_overdue(&self.db.pool).await {
                Ok(0) => debug!("Quote expiry: nothing to expire"),
                Ok(count) => info!(count = count, "Quote expiry: expired overdue quotes"),
                Err(e) => error!("Error expiring quotes: {}", e),
            }
        }
    }
}

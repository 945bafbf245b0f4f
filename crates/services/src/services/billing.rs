//! Applies provider webhook events to subscription rows, guarded by the
//! webhook event ledger so redeliveries are acknowledged without re-applying.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use db::models::{
    subscription::{PaymentProvider, PlanTier, Subscription, SubscriptionChange, SubscriptionStatus},
    webhook_event::{WebhookEvent, WebhookEventStatus},
};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("failed to apply {event_type}: {message}")]
    Apply {
        event_type: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    AlreadyProcessed,
    Ignored,
}

/// Where the tenant for an event comes from.
enum CompanyRef {
    Id(Uuid),
    BySubscriptionId(String),
}

struct MappedEvent {
    company: CompanyRef,
    change: SubscriptionChange,
}

/// Ledger-first event processing. A failed application is recorded as failed
/// and surfaced, and the ledger row is re-armed so the provider's redelivery
/// gets another attempt; a successful or ignored event acknowledges replays.
pub async fn process_event(
    pool: &SqlitePool,
    provider: PaymentProvider,
    raw_payload: &[u8],
) -> Result<ProcessOutcome, BillingError> {
    let payload: Value = serde_json::from_slice(raw_payload)
        .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;

    let (event_id, event_type) = envelope(provider, &payload)?;

    let payload_text = payload.to_string();
    let event = match WebhookEvent::try_insert(pool, provider, &event_id, &event_type, &payload_text)
        .await?
    {
        Some(event) => event,
        None => {
            let existing = WebhookEvent::find_by_provider_event(pool, provider, &event_id)
                .await?
                .ok_or_else(|| BillingError::MalformedPayload("ledger row vanished".to_string()))?;
            if existing.status != WebhookEventStatus::Failed {
                info!(
                    provider = %provider,
                    event_id = %event_id,
                    "webhook replay acknowledged without re-applying"
                );
                return Ok(ProcessOutcome::AlreadyProcessed);
            }
            WebhookEvent::reset_for_retry(pool, existing.id).await?;
            existing
        }
    };

    let mapped = match provider {
        PaymentProvider::Stripe => map_stripe_event(&event_type, &payload),
        PaymentProvider::Square => map_square_event(pool, &event_type, &payload).await?,
    };

    let Some(mapped) = mapped else {
        WebhookEvent::mark_status(pool, event.id, WebhookEventStatus::Ignored, None).await?;
        info!(provider = %provider, event_type = %event_type, "webhook event ignored");
        return Ok(ProcessOutcome::Ignored);
    };

    match apply(pool, provider, mapped).await {
        Ok(Some(subscription)) => {
            WebhookEvent::mark_status(pool, event.id, WebhookEventStatus::Processed, None).await?;
            info!(
                provider = %provider,
                event_type = %event_type,
                company_id = %subscription.company_id,
                plan = %subscription.plan,
                status = %subscription.status,
                "webhook event applied"
            );
            Ok(ProcessOutcome::Processed)
        }
        Ok(None) => {
            // The referenced subscription is not ours; acknowledge and move on.
            WebhookEvent::mark_status(pool, event.id, WebhookEventStatus::Ignored, None).await?;
            warn!(
                provider = %provider,
                event_type = %event_type,
                "webhook event referenced an unknown subscription"
            );
            Ok(ProcessOutcome::Ignored)
        }
        Err(e) => {
            let message = e.to_string();
            WebhookEvent::mark_status(pool, event.id, WebhookEventStatus::Failed, Some(&message))
                .await?;
            Err(BillingError::Apply {
                event_type,
                message,
            })
        }
    }
}

/// Plan currently in force for a tenant.
pub async fn effective_plan(pool: &SqlitePool, company_id: Uuid) -> Result<PlanTier, sqlx::Error> {
    let subscription = Subscription::find_by_company(pool, company_id).await?;
    Ok(Subscription::effective_plan(subscription.as_ref()))
}

fn envelope(provider: PaymentProvider, payload: &Value) -> Result<(String, String), BillingError> {
    let id_field = match provider {
        PaymentProvider::Stripe => "id",
        PaymentProvider::Square => "event_id",
    };
    let event_id = payload
        .get(id_field)
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::MalformedPayload(format!("missing {id_field}")))?;
    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::MalformedPayload("missing type".to_string()))?;
    Ok((event_id.to_string(), event_type.to_string()))
}

async fn apply(
    pool: &SqlitePool,
    provider: PaymentProvider,
    mapped: MappedEvent,
) -> Result<Option<Subscription>, sqlx::Error> {
    let company_id = match mapped.company {
        CompanyRef::Id(id) => id,
        CompanyRef::BySubscriptionId(sub_id) => {
            match Subscription::find_by_provider_subscription_id(pool, provider, &sub_id).await? {
                Some(sub) => sub.company_id,
                None => return Ok(None),
            }
        }
    };

    let mut change = mapped.change;
    change.provider = Some(provider);
    Subscription::apply_change(pool, company_id, &change).await.map(Some)
}

fn object<'a>(payload: &'a Value) -> &'a Value {
    payload.pointer("/data/object").unwrap_or(&Value::Null)
}

fn parse_company_id(object: &Value, pointer: &str) -> Option<Uuid> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn parse_plan(object: &Value, pointer: &str) -> Option<PlanTier> {
    object
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| PlanTier::from_str(s).ok())
}

fn stripe_status(status: &str) -> SubscriptionStatus {
    match status {
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" | "unpaid" => SubscriptionStatus::PastDue,
        "canceled" | "incomplete_expired" => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Active,
    }
}

fn unix_timestamp(object: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    object
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

fn map_stripe_event(event_type: &str, payload: &Value) -> Option<MappedEvent> {
    let obj = object(payload);
    match event_type {
        "checkout.session.completed" => {
            if obj.get("payment_status").and_then(Value::as_str) != Some("paid") {
                return None;
            }
            let company_id = parse_company_id(obj, "/metadata/company_id")?;
            Some(MappedEvent {
                company: CompanyRef::Id(company_id),
                change: SubscriptionChange {
                    plan: parse_plan(obj, "/metadata/plan"),
                    status: Some(SubscriptionStatus::Active),
                    provider_subscription_id: obj
                        .get("subscription")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    provider_customer_id: obj
                        .get("customer")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ..Default::default()
                },
            })
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let subscription_id = obj.get("id").and_then(Value::as_str)?.to_string();
            let company = match parse_company_id(obj, "/metadata/company_id") {
                Some(id) => CompanyRef::Id(id),
                None => CompanyRef::BySubscriptionId(subscription_id.clone()),
            };
            Some(MappedEvent {
                company,
                change: SubscriptionChange {
                    plan: parse_plan(obj, "/metadata/plan"),
                    status: obj
                        .get("status")
                        .and_then(Value::as_str)
                        .map(stripe_status),
                    provider_subscription_id: Some(subscription_id),
                    provider_customer_id: obj
                        .get("customer")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    current_period_end: unix_timestamp(obj, "/current_period_end"),
                    cancel_at_period_end: obj
                        .get("cancel_at_period_end")
                        .and_then(Value::as_bool),
                    ..Default::default()
                },
            })
        }
        "customer.subscription.deleted" => {
            let subscription_id = obj.get("id").and_then(Value::as_str)?.to_string();
            Some(MappedEvent {
                company: CompanyRef::BySubscriptionId(subscription_id.clone()),
                change: SubscriptionChange {
                    status: Some(SubscriptionStatus::Canceled),
                    provider_subscription_id: Some(subscription_id),
                    ..Default::default()
                },
            })
        }
        "invoice.paid" | "invoice.payment_succeeded" => {
            let subscription_id = obj.get("subscription").and_then(Value::as_str)?.to_string();
            Some(MappedEvent {
                company: CompanyRef::BySubscriptionId(subscription_id),
                change: SubscriptionChange {
                    status: Some(SubscriptionStatus::Active),
                    ..Default::default()
                },
            })
        }
        "invoice.payment_failed" => {
            let subscription_id = obj.get("subscription").and_then(Value::as_str)?.to_string();
            Some(MappedEvent {
                company: CompanyRef::BySubscriptionId(subscription_id),
                change: SubscriptionChange {
                    status: Some(SubscriptionStatus::PastDue),
                    ..Default::default()
                },
            })
        }
        _ => None,
    }
}

fn square_status(status: &str) -> SubscriptionStatus {
    match status {
        "CANCELED" | "DEACTIVATED" => SubscriptionStatus::Canceled,
        "PAUSED" => SubscriptionStatus::PastDue,
        _ => SubscriptionStatus::Active,
    }
}

async fn map_square_event(
    _pool: &SqlitePool,
    event_type: &str,
    payload: &Value,
) -> Result<Option<MappedEvent>, BillingError> {
    let obj = object(payload);
    let mapped = match event_type {
        "subscription.created" | "subscription.updated" => {
            let sub = obj.get("subscription").unwrap_or(&Value::Null);
            let subscription_id = sub.get("id").and_then(Value::as_str).map(str::to_string);
            subscription_id.map(|subscription_id| MappedEvent {
                company: CompanyRef::BySubscriptionId(subscription_id.clone()),
                change: SubscriptionChange {
                    status: sub.get("status").and_then(Value::as_str).map(square_status),
                    provider_subscription_id: Some(subscription_id),
                    provider_customer_id: sub
                        .get("customer_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ..Default::default()
                },
            })
        }
        "invoice.payment_made" => {
            let invoice = obj.get("invoice").unwrap_or(&Value::Null);
            invoice
                .get("subscription_id")
                .and_then(Value::as_str)
                .map(|subscription_id| MappedEvent {
                    company: CompanyRef::BySubscriptionId(subscription_id.to_string()),
                    change: SubscriptionChange {
                        status: Some(SubscriptionStatus::Active),
                        ..Default::default()
                    },
                })
        }
        // Payment-link purchases: the order reference carries our tenant id
        // and the payment note carries the plan slug.
        "payment.created" | "payment.updated" => {
            let payment = obj.get("payment").unwrap_or(&Value::Null);
            if payment.get("status").and_then(Value::as_str) != Some("COMPLETED") {
                None
            } else {
                let company_id = parse_company_id(payment, "/reference_id");
                company_id.map(|company_id| MappedEvent {
                    company: CompanyRef::Id(company_id),
                    change: SubscriptionChange {
                        plan: parse_plan(payment, "/note"),
                        status: Some(SubscriptionStatus::Active),
                        provider_customer_id: payment
                            .get("customer_id")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        ..Default::default()
                    },
                })
            }
        }
        _ => None,
    };
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::DBService;
    use db::models::company::{Company, CreateCompany};
    use serde_json::json;

    async fn setup() -> (DBService, Company) {
        let db = DBService::new_in_memory().await.unwrap();
        let company = Company::create(
            &db.pool,
            &CreateCompany {
                name: "Sunbeam Solar".to_string(),
                slug: None,
                contact_email: "ops@sunbeam.example".to_string(),
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

    fn checkout_completed(event_id: &str, company_id: Uuid) -> Vec<u8> {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_test_1",
                "payment_status": "paid",
                "customer": "cus_123",
                "subscription": "sub_123",
                "metadata": { "company_id": company_id.to_string(), "plan": "pro" }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn checkout_completed_activates_plan() {
        let (db, company) = setup().await;

        let outcome = process_event(
            &db.pool,
            PaymentProvider::Stripe,
            &checkout_completed("evt_1", company.id),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::Processed);

        let sub = Subscription::find_by_company(&db.pool, company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.plan, PlanTier::Pro);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.provider, Some(PaymentProvider::Stripe));
        assert_eq!(sub.provider_subscription_id.as_deref(), Some("sub_123"));
    }

    #[tokio::test]
    async fn replayed_event_is_acknowledged_without_reapplying() {
        let (db, company) = setup().await;
        let payload = checkout_completed("evt_dup", company.id);

        let first = process_event(&db.pool, PaymentProvider::Stripe, &payload)
            .await
            .unwrap();
        assert_eq!(first, ProcessOutcome::Processed);

        let second = process_event(&db.pool, PaymentProvider::Stripe, &payload)
            .await
            .unwrap();
        assert_eq!(second, ProcessOutcome::AlreadyProcessed);
    }

    #[tokio::test]
    async fn payment_failure_marks_past_due_and_recovery_restores() {
        let (db, company) = setup().await;
        process_event(
            &db.pool,
            PaymentProvider::Stripe,
            &checkout_completed("evt_a", company.id),
        )
        .await
        .unwrap();

        let failed = json!({
            "id": "evt_b",
            "type": "invoice.payment_failed",
            "data": { "object": { "id": "in_1", "subscription": "sub_123" } }
        })
        .to_string();
        process_event(&db.pool, PaymentProvider::Stripe, failed.as_bytes())
            .await
            .unwrap();
        let sub = Subscription::find_by_company(&db.pool, company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.plan, PlanTier::Pro);

        let paid = json!({
            "id": "evt_c",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_2", "subscription": "sub_123" } }
        })
        .to_string();
        process_event(&db.pool, PaymentProvider::Stripe, paid.as_bytes())
            .await
            .unwrap();
        let sub = Subscription::find_by_company(&db.pool, company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn subscription_deleted_cancels() {
        let (db, company) = setup().await;
        process_event(
            &db.pool,
            PaymentProvider::Stripe,
            &checkout_completed("evt_a", company.id),
        )
        .await
        .unwrap();

        let deleted = json!({
            "id": "evt_del",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_123", "status": "canceled" } }
        })
        .to_string();
        process_event(&db.pool, PaymentProvider::Stripe, deleted.as_bytes())
            .await
            .unwrap();

        let sub = Subscription::find_by_company(&db.pool, company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Canceled);
        assert_eq!(Subscription::effective_plan(Some(&sub)), PlanTier::Free);
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let (db, _company) = setup().await;
        let payload = json!({
            "id": "evt_x",
            "type": "charge.refunded",
            "data": { "object": {} }
        })
        .to_string();
        let outcome = process_event(&db.pool, PaymentProvider::Stripe, payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Ignored);
    }

    #[tokio::test]
    async fn unknown_square_subscription_is_ignored_not_failed() {
        let (db, _company) = setup().await;
        let payload = json!({
            "event_id": "sq_evt_1",
            "type": "subscription.updated",
            "data": { "object": { "subscription": { "id": "never-seen", "status": "ACTIVE" } } }
        })
        .to_string();
        let outcome = process_event(&db.pool, PaymentProvider::Square, payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Ignored);
    }

    #[tokio::test]
    async fn square_payment_link_purchase_activates_plan() {
        let (db, company) = setup().await;
        let payload = json!({
            "event_id": "sq_evt_2",
            "type": "payment.updated",
            "data": { "object": { "payment": {
                "status": "COMPLETED",
                "reference_id": company.id.to_string(),
                "note": "pro",
                "customer_id": "SQ_CUST"
            }}}
        })
        .to_string();
        let outcome = process_event(&db.pool, PaymentProvider::Square, payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Processed);

        let sub = Subscription::find_by_company(&db.pool, company.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sub.plan, PlanTier::Pro);
        assert_eq!(sub.provider, Some(PaymentProvider::Square));
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let (db, _company) = setup().await;
        let err = process_event(&db.pool, PaymentProvider::Stripe, b"not json").await;
        assert!(matches!(err, Err(BillingError::MalformedPayload(_))));

        let missing_id = json!({ "type": "invoice.paid" }).to_string();
        let err = process_event(&db.pool, PaymentProvider::Stripe, missing_id.as_bytes()).await;
        assert!(matches!(err, Err(BillingError::MalformedPayload(_))));
    }
}

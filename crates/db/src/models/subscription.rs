use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;
use uuid::Uuid;

/// Billing tier. Gates features and quotas via the feature-gate service.
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "plan_tier", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    #[default]
    Active,
    PastDue,
    Canceled,
}

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[sqlx(type_name = "payment_provider", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentProvider {
    Square,
    Stripe,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub provider: Option<PaymentProvider>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a provider event is allowed to touch.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChange {
    pub plan: Option<PlanTier>,
    pub status: Option<SubscriptionStatus>,
    pub provider: Option<PaymentProvider>,
    pub provider_subscription_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
}

const SUBSCRIPTION_COLUMNS: &str = "id, company_id, plan, status, provider, \
     provider_subscription_id, provider_customer_id, current_period_end, cancel_at_period_end, \
     created_at, updated_at";

impl Subscription {
    pub async fn find_by_company(
        pool: &SqlitePool,
        company_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE company_id = $1"
        ))
        .bind(company_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_provider_subscription_id(
        pool: &SqlitePool,
        provider: PaymentProvider,
        provider_subscription_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
             WHERE provider = $1 AND provider_subscription_id = $2"
        ))
        .bind(provider)
        .bind(provider_subscription_id)
        .fetch_optional(pool)
        .await
    }

    /// One subscription row per company; provider events land here whether or
    /// not a row already exists.
    pub async fn apply_change(
        pool: &SqlitePool,
        company_id: Uuid,
        change: &SubscriptionChange,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "INSERT INTO subscriptions (id, company_id, plan, status, provider, provider_subscription_id, provider_customer_id, current_period_end, cancel_at_period_end)
             VALUES ($1, $2, COALESCE($3, 'free'), COALESCE($4, 'active'), $5, $6, $7, $8, COALESCE($9, 0))
             ON CONFLICT (company_id) DO UPDATE SET
                 plan = COALESCE($3, plan),
                 status = COALESCE($4, status),
                 provider = COALESCE($5, provider),
                 provider_subscription_id = COALESCE($6, provider_subscription_id),
                 provider_customer_id = COALESCE($7, provider_customer_id),
                 current_period_end = COALESCE($8, current_period_end),
                 cancel_at_period_end = COALESCE($9, cancel_at_period_end),
                 updated_at = datetime('now', 'subsec')
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(change.plan)
        .bind(change.status)
        .bind(change.provider)
        .bind(&change.provider_subscription_id)
        .bind(&change.provider_customer_id)
        .bind(change.current_period_end)
        .bind(change.cancel_at_period_end)
        .fetch_one(pool)
        .await
    }

    pub async fn set_cancel_at_period_end(
        pool: &SqlitePool,
        company_id: Uuid,
        cancel: bool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "UPDATE subscriptions
             SET cancel_at_period_end = $2, updated_at = datetime('now', 'subsec')
             WHERE company_id = $1
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(company_id)
        .bind(cancel)
        .fetch_optional(pool)
        .await
    }

    /// Plan that is actually in force: canceled or absent rows fall back to free.
    pub fn effective_plan(subscription: Option<&Subscription>) -> PlanTier {
        match subscription {
            Some(sub) if sub.status != SubscriptionStatus::Canceled => sub.plan,
            _ => PlanTier::Free,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(plan: PlanTier, status: SubscriptionStatus) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            plan,
            status,
            provider: None,
            provider_subscription_id: None,
            provider_customer_id: None,
            current_period_end: None,
            cancel_at_period_end: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn effective_plan_falls_back_to_free() {
        assert_eq!(Subscription::effective_plan(None), PlanTier::Free);
        let canceled = sub(PlanTier::Pro, SubscriptionStatus::Canceled);
        assert_eq!(Subscription::effective_plan(Some(&canceled)), PlanTier::Free);
    }

    #[test]
    fn effective_plan_honors_live_statuses() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
        ] {
            let s = sub(PlanTier::Pro, status);
            assert_eq!(Subscription::effective_plan(Some(&s)), PlanTier::Pro);
        }
    }
}

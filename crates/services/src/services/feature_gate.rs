//! Plan → feature and quota mapping. Pure functions; callers supply usage.

use db::models::subscription::PlanTier;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Feature {
    Crawler,
    Integrations,
    BrandedDocuments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Quota {
    Customers,
    Products,
    QuotesPerMonth,
    CrawlJobsPerDay,
}

/// `None` means unlimited.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, TS)]
pub struct PlanLimits {
    pub max_customers: Option<i64>,
    pub max_products: Option<i64>,
    pub max_quotes_per_month: Option<i64>,
    pub max_crawl_jobs_per_day: Option<i64>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GateError {
    #[error("the {feature} feature requires a higher plan than {plan}")]
    FeatureNotIncluded { plan: PlanTier, feature: Feature },
    #[error("{quota} limit reached on the {plan} plan ({used} of {limit})")]
    LimitReached {
        plan: PlanTier,
        quota: Quota,
        limit: i64,
        used: i64,
    },
}

pub fn limits(plan: PlanTier) -> PlanLimits {
    match plan {
        PlanTier::Free => PlanLimits {
            max_customers: Some(10),
            max_products: Some(50),
            max_quotes_per_month: Some(5),
            max_crawl_jobs_per_day: Some(1),
        },
        PlanTier::Pro => PlanLimits {
            max_customers: Some(500),
            max_products: Some(5_000),
            max_quotes_per_month: Some(100),
            max_crawl_jobs_per_day: Some(10),
        },
        PlanTier::Enterprise => PlanLimits {
            max_customers: None,
            max_products: None,
            max_quotes_per_month: None,
            max_crawl_jobs_per_day: None,
        },
    }
}

pub fn plan_includes(plan: PlanTier, feature: Feature) -> bool {
    match feature {
        Feature::Crawler | Feature::Integrations => plan != PlanTier::Free,
        Feature::BrandedDocuments => plan == PlanTier::Enterprise,
    }
}

pub fn ensure_feature(plan: PlanTier, feature: Feature) -> Result<(), GateError> {
    if plan_includes(plan, feature) {
        Ok(())
    } else {
        Err(GateError::FeatureNotIncluded { plan, feature })
    }
}

/// `used` is the count that already exists; the check asks whether one more
/// would fit.
pub fn ensure_within_limit(plan: PlanTier, quota: Quota, used: i64) -> Result<(), GateError> {
    let plan_limits = limits(plan);
    let limit = match quota {
        Quota::Customers => plan_limits.max_customers,
        Quota::Products => plan_limits.max_products,
        Quota::QuotesPerMonth => plan_limits.max_quotes_per_month,
        Quota::CrawlJobsPerDay => plan_limits.max_crawl_jobs_per_day,
    };

    match limit {
        Some(limit) if used >= limit => Err(GateError::LimitReached {
            plan,
            quota,
            limit,
            used,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_blocks_crawler_and_integrations() {
        assert!(ensure_feature(PlanTier::Free, Feature::Crawler).is_err());
        assert!(ensure_feature(PlanTier::Free, Feature::Integrations).is_err());
        assert!(ensure_feature(PlanTier::Pro, Feature::Crawler).is_ok());
        assert!(ensure_feature(PlanTier::Pro, Feature::Integrations).is_ok());
    }

    #[test]
    fn branded_documents_are_enterprise_only() {
        assert!(ensure_feature(PlanTier::Pro, Feature::BrandedDocuments).is_err());
        assert!(ensure_feature(PlanTier::Enterprise, Feature::BrandedDocuments).is_ok());
    }

    #[test]
    fn limit_boundary_is_inclusive() {
        // 9 existing customers of 10: one more fits.
        assert!(ensure_within_limit(PlanTier::Free, Quota::Customers, 9).is_ok());
        // 10 existing of 10: full.
        let err = ensure_within_limit(PlanTier::Free, Quota::Customers, 10).unwrap_err();
        assert_eq!(
            err,
            GateError::LimitReached {
                plan: PlanTier::Free,
                quota: Quota::Customers,
                limit: 10,
                used: 10,
            }
        );
    }

    #[test]
    fn enterprise_is_unlimited() {
        assert!(ensure_within_limit(PlanTier::Enterprise, Quota::Products, 1_000_000).is_ok());
        assert!(ensure_within_limit(PlanTier::Enterprise, Quota::QuotesPerMonth, i64::MAX).is_ok());
    }
}

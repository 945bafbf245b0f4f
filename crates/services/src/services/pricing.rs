//! The one place quote arithmetic lives. Route handlers never add cents.

use db::models::quote::CreateQuoteItem;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

/// Tax rates are basis points; 10_000 bps = 100%.
const BPS_SCALE: i64 = 10_000;
pub const MAX_TAX_RATE_BPS: i64 = 5_000;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PricingError {
    #[error("quote must have at least one line item")]
    NoItems,
    #[error("line item {index}: quantity must be positive")]
    NonPositiveQuantity { index: usize },
    #[error("line item {index}: unit price must not be negative")]
    NegativeUnitPrice { index: usize },
    #[error("discount must not be negative")]
    NegativeDiscount,
    #[error("shipping must not be negative")]
    NegativeShipping,
    #[error("tax rate {0} bps is out of range (0..={MAX_TAX_RATE_BPS})")]
    TaxRateOutOfRange(i64),
    #[error("amounts overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
pub struct QuoteTotals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub shipping_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
}

/// subtotal = Σ(unit price × quantity); the discount is clamped to the
/// subtotal; tax applies to the discounted goods (not shipping), rounded
/// half-up; total = subtotal − discount + shipping + tax.
pub fn compute_totals(
    items: &[CreateQuoteItem],
    discount_cents: i64,
    shipping_cents: i64,
    tax_rate_bps: i64,
) -> Result<QuoteTotals, PricingError> {
    if items.is_empty() {
        return Err(PricingError::NoItems);
    }
    if discount_cents < 0 {
        return Err(PricingError::NegativeDiscount);
    }
    if shipping_cents < 0 {
        return Err(PricingError::NegativeShipping);
    }
    if !(0..=MAX_TAX_RATE_BPS).contains(&tax_rate_bps) {
        return Err(PricingError::TaxRateOutOfRange(tax_rate_bps));
    }

    let mut subtotal: i64 = 0;
    for (index, item) in items.iter().enumerate() {
        if item.quantity <= 0 {
            return Err(PricingError::NonPositiveQuantity { index });
        }
        if item.unit_price_cents < 0 {
            return Err(PricingError::NegativeUnitPrice { index });
        }
        let extension = item
            .unit_price_cents
            .checked_mul(item.quantity)
            .ok_or(PricingError::Overflow)?;
        subtotal = subtotal.checked_add(extension).ok_or(PricingError::Overflow)?;
    }

    let discount = discount_cents.min(subtotal);
    let taxable = subtotal - discount;
    let tax = taxable
        .checked_mul(tax_rate_bps)
        .map(|scaled| (scaled + BPS_SCALE / 2) / BPS_SCALE)
        .ok_or(PricingError::Overflow)?;
    let total = taxable
        .checked_add(shipping_cents)
        .and_then(|t| t.checked_add(tax))
        .ok_or(PricingError::Overflow)?;

    Ok(QuoteTotals {
        subtotal_cents: subtotal,
        discount_cents: discount,
        shipping_cents,
        tax_cents: tax,
        total_cents: total,
    })
}

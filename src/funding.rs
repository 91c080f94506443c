// 5.0: funding. every hour longs pay shorts (or the reverse) to keep the perp mark near the index.
// 5.0 has the params and records. 5.1 has the rate and payment formulas.

use crate::account::MarginError;
use crate::mark_price::OracleError;
use crate::market::MarketError;
use crate::types::{round_rate, AccountId, DerivativeId, Hbar, MarketId, Outcome, Side, Timestamp, MS_PER_HOUR};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One week of hourly rates.
pub const FUNDING_HISTORY_CAP: usize = 168;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FundingParams {
    pub interest_rate_8h: Decimal,
    pub interest_clamp: Decimal,
    pub max_hourly_rate: Decimal,
    pub interval_ms: i64,
    pub history_cap: usize,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            interest_rate_8h: dec!(0.0001),
            interest_clamp: dec!(0.0005),
            max_hourly_rate: dec!(0.04),
            interval_ms: MS_PER_HOUR,
            history_cap: FUNDING_HISTORY_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub rate: Decimal,
    pub premium: Decimal,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingPayment {
    pub position: DerivativeId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub side: Side,
    pub size_hbar: Hbar,
    pub rate: Decimal,
    /// Signed: negative means the account paid
    pub amount_hbar: Hbar,
    /// Part of a debit the balance could not cover
    pub shortfall_hbar: Hbar,
    pub timestamp: Timestamp,
}

// 5.1: how far the perp is from the index. positive = perp above index
pub fn calculate_premium(mark_price: Decimal, index_price: Decimal) -> Decimal {
    if index_price.is_zero() {
        return Decimal::ZERO;
    }
    (mark_price - index_price) / index_price
}

fn clamp(value: Decimal, bound: Decimal) -> Decimal {
    value.max(-bound).min(bound)
}

// 5.2: premium plus clamped interest, spread over 8 hours, then capped per hour
pub fn compute_funding_rate(mark_price: Decimal, index_price: Decimal, params: &FundingParams) -> Decimal {
    let premium = calculate_premium(mark_price, index_price);
    let interest = clamp(params.interest_rate_8h - premium, params.interest_clamp);
    let raw = (premium + interest) / dec!(8);
    round_rate(clamp(raw, params.max_hourly_rate))
}

// 5.3: what a position pays or receives. longs pay when the rate is positive
pub fn funding_amount(side: Side, size: Hbar, rate: Decimal) -> Hbar {
    Hbar::rounded(size.value() * rate * side.sign() * dec!(-1))
}

/// Appends a rate and trims the series to the newest `cap` entries.
pub fn push_capped<T>(history: &mut VecDeque<T>, entry: T, cap: usize) {
    history.push_back(entry);
    while history.len() > cap {
        history.pop_front();
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FundingError {
    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Margin(#[from] MarginError),
}

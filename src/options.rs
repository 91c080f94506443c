//! Options on outcome probabilities.
//!
//! Pricing is Black-Scholes moved into logit space: the spot probability and the
//! strike are mapped through `ln(x / (1 - x))` before the usual d1/d2 terms. The
//! normal CDF is the Abramowitz-Stegun 26.2.17 polynomial (error below 7.5e-8).
//!
//! Writers lock the full notional as collateral. Payoff at exercise is measured in
//! probability space against the oracle mark, so it never exceeds the collateral.

use crate::account::MarginError;
use crate::mark_price::OracleError;
use crate::market::MarketError;
use crate::types::{decimal_from_f64, decimal_to_f64, AccountId, DerivativeId, Hbar, MarketId, Outcome, ParseEnumError, Timestamp, MS_PER_DAY};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const DEFAULT_VOLATILITY: f64 = 0.5;
pub const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionType {
    Call,
    Put,
}

impl FromStr for OptionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CALL" => Ok(OptionType::Call),
            "PUT" => Ok(OptionType::Put),
            _ => Err(ParseEnumError { kind: "option type", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionStyle {
    /// Exercisable only at or after expiry
    European,
    /// Exercisable any time while active
    American,
}

impl FromStr for OptionStyle {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EUROPEAN" => Ok(OptionStyle::European),
            "AMERICAN" => Ok(OptionStyle::American),
            _ => Err(ParseEnumError { kind: "option style", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptionStatus {
    Active,
    Exercised,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionParams {
    pub default_volatility: f64,
    pub days_per_year: f64,
}

impl Default for OptionParams {
    fn default() -> Self {
        Self {
            default_volatility: DEFAULT_VOLATILITY,
            days_per_year: DAYS_PER_YEAR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub id: DerivativeId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub option_type: OptionType,
    pub style: OptionStyle,
    pub strike_price: Decimal,
    /// Price the holder pays the writer
    pub premium_hbar: Hbar,
    pub size_hbar: Hbar,
    pub collateral_hbar: Hbar,
    pub writer_account_id: AccountId,
    /// None until sold
    pub holder_account_id: Option<AccountId>,
    pub expiry: Timestamp,
    pub status: OptionStatus,
    pub volatility: f64,
    pub theoretical_premium_hbar: Hbar,
    pub mark_price: Decimal,
    pub holder_pnl_hbar: Hbar,
    pub writer_pnl_hbar: Hbar,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub purchased_at: Option<Timestamp>,
    pub settled_at: Option<Timestamp>,
    pub settlement_price: Option<Decimal>,
    pub payoff_hbar: Option<Hbar>,
}

impl OptionContract {
    pub fn is_active(&self) -> bool {
        self.status == OptionStatus::Active
    }

    pub fn is_sold(&self) -> bool {
        self.holder_account_id.is_some()
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expiry
    }

    pub fn involves(&self, account_id: &AccountId) -> bool {
        &self.writer_account_id == account_id || self.holder_account_id.as_ref() == Some(account_id)
    }

    /// Years left until expiry, never negative.
    pub fn time_to_expiry_years(&self, now: Timestamp, days_per_year: f64) -> f64 {
        let ms = now.millis_until(&self.expiry).max(0);
        (ms as f64 / MS_PER_DAY as f64) / days_per_year
    }
}

/// Terms a writer offers. Volatility falls back to the configured default.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptionRequest {
    pub writer_account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub option_type: OptionType,
    pub style: OptionStyle,
    pub strike_price: Decimal,
    pub size_hbar: Hbar,
    pub premium_hbar: Hbar,
    pub expiry: Timestamp,
    pub volatility: Option<f64>,
}

pub fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

/// Standard normal CDF, Abramowitz-Stegun 26.2.17.
pub fn norm_cdf(x: f64) -> f64 {
    const P: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;

    let z = x.abs();
    let t = 1.0 / (1.0 + P * z);
    let pdf = (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    let upper = 1.0 - pdf * poly;
    if x >= 0.0 {
        upper
    } else {
        1.0 - upper
    }
}

/// Per-unit value in logit space. At zero time or volatility it collapses to intrinsic.
pub fn logit_black_scholes(option_type: OptionType, spot: f64, strike: f64, volatility: f64, years: f64) -> f64 {
    let s = logit(spot);
    let k = logit(strike);
    if years <= 0.0 || volatility <= 0.0 {
        return match option_type {
            OptionType::Call => (s - k).max(0.0),
            OptionType::Put => (k - s).max(0.0),
        };
    }
    let vol_t = volatility * years.sqrt();
    let d1 = (s - k + 0.5 * volatility * volatility * years) / vol_t;
    let d2 = d1 - vol_t;
    match option_type {
        OptionType::Call => s * norm_cdf(d1) - k * norm_cdf(d2),
        OptionType::Put => k * norm_cdf(-d2) - s * norm_cdf(-d1),
    }
}

/// Theoretical premium for the whole contract, floored at zero.
pub fn theoretical_premium(
    option_type: OptionType,
    mark: Decimal,
    strike: Decimal,
    size: Hbar,
    volatility: f64,
    years: f64,
) -> Result<Hbar, OptionError> {
    let unit = logit_black_scholes(option_type, decimal_to_f64(mark), decimal_to_f64(strike), volatility, years);
    let unit = decimal_from_f64(unit.max(0.0))
        .ok_or_else(|| OptionError::Numerical(format!("premium for strike {strike} at mark {mark}")))?;
    Ok(Hbar::rounded(unit * size.value()))
}

/// Exercise value at the mark: `max(0, mark - strike)` for calls, mirrored for puts.
pub fn payoff(option_type: OptionType, mark: Decimal, strike: Decimal, size: Hbar) -> Hbar {
    let unit = match option_type {
        OptionType::Call => mark - strike,
        OptionType::Put => strike - mark,
    };
    Hbar::rounded(unit.max(Decimal::ZERO) * size.value())
}

pub fn validate_strike(strike: Decimal) -> Result<(), OptionError> {
    if strike <= Decimal::ZERO || strike >= dec!(1) {
        return Err(OptionError::InvalidStrike(strike));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptionError {
    #[error("Strike must be within (0, 1), got {0}")]
    InvalidStrike(Decimal),

    #[error("Option size must be positive, got {0}")]
    InvalidSize(Decimal),

    #[error("Premium must be positive, got {0}")]
    InvalidPremium(Decimal),

    #[error("Volatility must be positive and finite, got {0}")]
    InvalidVolatility(f64),

    #[error("Expiry {expiry} is not after current time {now}")]
    InvalidExpiry { expiry: Timestamp, now: Timestamp },

    #[error("Account id is empty")]
    EmptyAccountId,

    #[error("Option {0} not found")]
    NotFound(DerivativeId),

    #[error("Option {id} is not active (status {status:?})")]
    NotActive { id: DerivativeId, status: OptionStatus },

    #[error("Option {0} has already been sold")]
    AlreadySold(DerivativeId),

    #[error("Option {0} has no holder")]
    NotSold(DerivativeId),

    #[error("Writer cannot buy their own option {0}")]
    SelfPurchase(DerivativeId),

    #[error("Option {0} has expired")]
    Expired(DerivativeId),

    #[error("Option {id} is held by another account, not {requested_by}")]
    NotHolder { id: DerivativeId, requested_by: AccountId },

    #[error("Option {id} was written by another account, not {requested_by}")]
    NotWriter { id: DerivativeId, requested_by: AccountId },

    #[error("European option {id} cannot be exercised before {expiry}")]
    PrematureExercise { id: DerivativeId, expiry: Timestamp },

    #[error("Numerical failure in option pricing: {0}")]
    Numerical(String),

    #[error(transparent)]
    InvalidEnum(#[from] ParseEnumError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Margin(#[from] MarginError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norm_cdf_reference_points() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((norm_cdf(1.0) - 0.8413447).abs() < 1e-6);
        assert!((norm_cdf(-1.96) - 0.0249979).abs() < 1e-6);
        assert!((norm_cdf(2.5) + norm_cdf(-2.5) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn logit_is_zero_at_half() {
        assert!(logit(0.5).abs() < 1e-12);
        assert!(logit(0.7) > 0.0);
        assert!(logit(0.3) < 0.0);
    }

    #[test]
    fn expired_value_is_intrinsic_in_logit_space() {
        let call = logit_black_scholes(OptionType::Call, 0.7, 0.5, 0.5, 0.0);
        assert!((call - logit(0.7)).abs() < 1e-12);
        assert_eq!(logit_black_scholes(OptionType::Put, 0.7, 0.5, 0.5, 0.0), 0.0);
    }

    #[test]
    fn call_value_grows_with_spot() {
        let low = logit_black_scholes(OptionType::Call, 0.55, 0.5, 0.5, 30.0 / 365.0);
        let high = logit_black_scholes(OptionType::Call, 0.65, 0.5, 0.5, 30.0 / 365.0);
        assert!(high > low);
    }

    #[test]
    fn payoff_in_probability_space() {
        let size = Hbar::new(dec!(50));
        assert_eq!(payoff(OptionType::Call, dec!(0.7), dec!(0.5), size).value(), dec!(10));
        assert!(payoff(OptionType::Put, dec!(0.7), dec!(0.5), size).is_zero());
        assert_eq!(payoff(OptionType::Put, dec!(0.2), dec!(0.5), size).value(), dec!(15));
    }

    #[test]
    fn strike_bounds_are_exclusive() {
        assert!(validate_strike(dec!(0)).is_err());
        assert!(validate_strike(dec!(1)).is_err());
        assert!(validate_strike(dec!(0.5)).is_ok());
    }

    #[test]
    fn enum_parsing() {
        assert_eq!("call".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("American".parse::<OptionStyle>().unwrap(), OptionStyle::American);
        assert!("straddle".parse::<OptionType>().is_err());
    }
}

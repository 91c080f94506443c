//! Market catalog records.
//!
//! A market is a single question with a fixed set of outcomes. Its implied odds are
//! written back by the LMSR curve (curve markets) or seeded from the quote book
//! (CLOB markets) and feed the oracle's index price on the next read.

use crate::amm::CurveState;
use crate::types::{round_percent, Hbar, MarketId, Outcome, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    /// Open for trading
    Open,
    /// Trading halted, awaiting resolution
    Closed,
    /// Outcome decided
    Resolved,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// How a market sources its implied odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiquidityModel {
    /// LMSR curve with a fixed liquidity parameter, funded at creation
    Curve { liquidity_b: f64, funding_hbar: Hbar },
    /// Odds seeded from resting bid/ask quotes
    Clob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub outcomes: Vec<Outcome>,
    pub status: MarketStatus,
    pub close_time: Timestamp,
    pub liquidity: LiquidityModel,
    /// Percentages at creation, may be empty
    pub initial_odds: BTreeMap<Outcome, Decimal>,
    /// Current percentages, sum to 100 once any trade or seed has happened
    pub current_odds: BTreeMap<Outcome, Decimal>,
    pub curve_state: Option<CurveState>,
    pub created_at: Timestamp,
}

impl Market {
    pub fn curve(
        id: MarketId,
        outcomes: Vec<Outcome>,
        close_time: Timestamp,
        liquidity_b: f64,
        funding_hbar: Hbar,
    ) -> Self {
        Self {
            id,
            outcomes,
            status: MarketStatus::Open,
            close_time,
            liquidity: LiquidityModel::Curve { liquidity_b, funding_hbar },
            initial_odds: BTreeMap::new(),
            current_odds: BTreeMap::new(),
            curve_state: None,
            created_at: Timestamp::default(),
        }
    }

    pub fn clob(id: MarketId, outcomes: Vec<Outcome>, close_time: Timestamp) -> Self {
        Self {
            id,
            outcomes,
            status: MarketStatus::Open,
            close_time,
            liquidity: LiquidityModel::Clob,
            initial_odds: BTreeMap::new(),
            current_odds: BTreeMap::new(),
            curve_state: None,
            created_at: Timestamp::default(),
        }
    }

    pub fn with_initial_odds(mut self, odds: BTreeMap<Outcome, Decimal>) -> Self {
        self.initial_odds = odds;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    pub fn has_outcome(&self, outcome: &Outcome) -> bool {
        self.outcomes.iter().any(|o| o == outcome)
    }

    pub fn require_open(&self) -> Result<(), MarketError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MarketError::NotOpen {
                market_id: self.id.clone(),
                status: self.status,
            })
        }
    }

    pub fn require_outcome(&self, outcome: &Outcome) -> Result<(), MarketError> {
        if self.has_outcome(outcome) {
            Ok(())
        } else {
            Err(MarketError::UnknownOutcome {
                market_id: self.id.clone(),
                outcome: outcome.clone(),
            })
        }
    }

    /// Structural checks run once at registration.
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.id.is_empty() {
            return Err(MarketError::InvalidOutcomes {
                market_id: self.id.clone(),
                reason: "market id is empty".to_string(),
            });
        }
        let distinct: BTreeSet<&Outcome> = self.outcomes.iter().collect();
        if self.outcomes.len() < 2 || distinct.len() != self.outcomes.len() {
            return Err(MarketError::InvalidOutcomes {
                market_id: self.id.clone(),
                reason: "need at least two distinct outcomes".to_string(),
            });
        }
        if self.outcomes.iter().any(|o| o.is_empty()) {
            return Err(MarketError::InvalidOutcomes {
                market_id: self.id.clone(),
                reason: "outcome name is empty".to_string(),
            });
        }

        if let LiquidityModel::Curve { liquidity_b, funding_hbar } = &self.liquidity {
            if !(liquidity_b.is_finite() && *liquidity_b > 0.0) {
                return Err(MarketError::InvalidLiquidity(*liquidity_b));
            }
            let required = required_curve_funding(*liquidity_b, self.outcomes.len());
            if funding_hbar.value() < required.value() {
                return Err(MarketError::InsufficientCurveFunding {
                    market_id: self.id.clone(),
                    required,
                    provided: *funding_hbar,
                });
            }
        }
        Ok(())
    }

    pub fn liquidity_b(&self) -> Option<f64> {
        match self.liquidity {
            LiquidityModel::Curve { liquidity_b, .. } => Some(liquidity_b),
            LiquidityModel::Clob => None,
        }
    }

    /// Odds the market currently quotes: current, else initial, else empty.
    pub fn quoted_odds(&self) -> &BTreeMap<Outcome, Decimal> {
        if !self.current_odds.is_empty() {
            &self.current_odds
        } else {
            &self.initial_odds
        }
    }

    /// Implied probability of an outcome in [0, 1]. Uniform when no odds are known.
    pub fn implied_probability(&self, outcome: &Outcome) -> Decimal {
        if let Some(pct) = self.quoted_odds().get(outcome) {
            return *pct / dec!(100);
        }
        if self.outcomes.is_empty() {
            return Decimal::ZERO;
        }
        Decimal::ONE / Decimal::from(self.outcomes.len() as u64)
    }

    /// Uniform percentage split, remainder on the last outcome.
    pub fn uniform_odds(&self) -> BTreeMap<Outcome, Decimal> {
        let weights: Vec<Decimal> = self.outcomes.iter().map(|_| Decimal::ONE).collect();
        normalize_to_percentages(&self.outcomes, &weights)
    }
}

/// Worst-case LMSR loss for `n` outcomes is `b * ln(n)`.
pub fn required_curve_funding(liquidity_b: f64, outcome_count: usize) -> Hbar {
    let loss = liquidity_b * (outcome_count.max(1) as f64).ln();
    let value = crate::types::decimal_from_f64(loss).unwrap_or(Decimal::MAX);
    // round up so rounding never leaves the curve under-funded
    Hbar::new(value.round_dp_with_strategy(crate::types::HBAR_DP, rust_decimal::RoundingStrategy::AwayFromZero))
}

/// Scales non-negative weights to percentages summing to exactly 100.
/// Each outcome but the last is rounded to 2 places; the last absorbs the remainder.
pub fn normalize_to_percentages(
    outcomes: &[Outcome],
    weights: &[Decimal],
) -> BTreeMap<Outcome, Decimal> {
    let mut odds = BTreeMap::new();
    if outcomes.is_empty() {
        return odds;
    }
    let total: Decimal = weights.iter().copied().sum();
    let n = outcomes.len();
    let mut allocated = Decimal::ZERO;

    for (i, outcome) in outcomes.iter().enumerate() {
        let pct = if i + 1 == n {
            dec!(100) - allocated
        } else {
            let weight = weights.get(i).copied().unwrap_or(Decimal::ZERO);
            let share = if total.is_zero() {
                dec!(100) / Decimal::from(n as u64)
            } else {
                weight / total * dec!(100)
            };
            round_percent(share)
        };
        allocated += pct;
        odds.insert(outcome.clone(), pct);
    }
    odds
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0} not found")]
    NotFound(MarketId),

    #[error("Market {market_id} is not open (status {status:?})")]
    NotOpen { market_id: MarketId, status: MarketStatus },

    #[error("Outcome {outcome} is not part of market {market_id}")]
    UnknownOutcome { market_id: MarketId, outcome: Outcome },

    #[error("Invalid outcomes for market {market_id}: {reason}")]
    InvalidOutcomes { market_id: MarketId, reason: String },

    #[error("Liquidity parameter must be positive, got {0}")]
    InvalidLiquidity(f64),

    #[error("Market {market_id} curve funding {provided} below required {required}")]
    InsufficientCurveFunding {
        market_id: MarketId,
        required: Hbar,
        provided: Hbar,
    },

    #[error("Market {0} already exists")]
    AlreadyExists(MarketId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn yes_no() -> Vec<Outcome> {
        vec![Outcome::new("YES"), Outcome::new("NO")]
    }

    #[test]
    fn curve_market_requires_funding() {
        // 25 * ln 2 = 17.33
        let market = Market::curve(MarketId::new("m1"), yes_no(), Timestamp(1), 25.0, Hbar::new(dec!(10)));
        assert!(matches!(
            market.validate(),
            Err(MarketError::InsufficientCurveFunding { .. })
        ));

        let short = Market::curve(MarketId::new("m1"), yes_no(), Timestamp(1), 25.0, Hbar::new(dec!(17.32)));
        assert!(short.validate().is_err());
        let funded = Market::curve(MarketId::new("m1"), yes_no(), Timestamp(1), 25.0, Hbar::new(dec!(17.33)));
        assert!(funded.validate().is_ok());
        assert_eq!(required_curve_funding(25.0, 2).value(), dec!(17.32867952));
    }

    #[test]
    fn rejects_duplicate_outcomes() {
        let market = Market::clob(
            MarketId::new("m1"),
            vec![Outcome::new("YES"), Outcome::new("YES")],
            Timestamp(1),
        );
        assert!(matches!(market.validate(), Err(MarketError::InvalidOutcomes { .. })));
    }

    #[test]
    fn rejects_non_positive_b() {
        let market = Market::curve(MarketId::new("m1"), yes_no(), Timestamp(1), 0.0, Hbar::new(dec!(100)));
        assert!(matches!(market.validate(), Err(MarketError::InvalidLiquidity(_))));
    }

    #[test]
    fn implied_probability_falls_back_to_uniform() {
        let market = Market::clob(MarketId::new("m1"), yes_no(), Timestamp(1));
        assert_eq!(market.implied_probability(&Outcome::new("YES")), dec!(0.5));

        let mut odds = BTreeMap::new();
        odds.insert(Outcome::new("YES"), dec!(62.5));
        odds.insert(Outcome::new("NO"), dec!(37.5));
        let market = market.with_initial_odds(odds);
        assert_eq!(market.implied_probability(&Outcome::new("YES")), dec!(0.625));
    }

    #[test]
    fn normalization_sums_to_exactly_100() {
        let outcomes = vec![Outcome::new("A"), Outcome::new("B"), Outcome::new("C")];
        let odds = normalize_to_percentages(&outcomes, &[dec!(1), dec!(1), dec!(1)]);
        assert_eq!(odds[&Outcome::new("A")], dec!(33.33));
        assert_eq!(odds[&Outcome::new("B")], dec!(33.33));
        assert_eq!(odds[&Outcome::new("C")], dec!(33.34));
        let total: Decimal = odds.values().copied().sum();
        assert_eq!(total, dec!(100));
    }
}

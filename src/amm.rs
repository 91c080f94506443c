//! LMSR (Logarithmic Market Scoring Rule) curve for low-liquidity markets.
//!
//! Formulas:
//! - Cost function: C(q) = b * ln(sum_i e^(q_i/b))
//! - Price: p_i = e^(q_i/b) / sum_j e^(q_j/b)
//! - Buy: find d with C(q + d*e_i) - C(q) = amount
//!
//! The inversion is a bracket-doubling bisection with a fixed 60 iterations. The
//! iteration count is part of the pricing contract: two implementations fed the same
//! state must issue bit-identical share counts, so it is never swapped for a tolerance.

use crate::market::{normalize_to_percentages, Market, MarketError};
use crate::types::{decimal_from_f64, decimal_to_f64, round_hbar, round_probability, Outcome};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BISECTION_ITERATIONS: u32 = 60;
/// Floor applied to odds before taking ln when deriving shares.
pub const MIN_SEED_PROBABILITY: f64 = 0.0001;
const MAX_BRACKET_DOUBLINGS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveState {
    pub liquidity_b: f64,
    pub shares: BTreeMap<Outcome, f64>,
}

impl CurveState {
    /// Derives q_i = b * ln(max(p_i, 0.0001)) from percentage odds.
    pub fn from_odds(
        liquidity_b: f64,
        outcomes: &[Outcome],
        odds_pct: &BTreeMap<Outcome, Decimal>,
    ) -> Result<Self, CurveError> {
        check_liquidity(liquidity_b)?;
        let uniform = 1.0 / outcomes.len().max(1) as f64;
        let shares = outcomes
            .iter()
            .map(|o| {
                let p = odds_pct
                    .get(o)
                    .map(|pct| decimal_to_f64(*pct) / 100.0)
                    .unwrap_or(uniform);
                (o.clone(), liquidity_b * p.max(MIN_SEED_PROBABILITY).ln())
            })
            .collect();
        Ok(Self { liquidity_b, shares })
    }

    pub fn cost(&self) -> f64 {
        lmsr_cost(self.shares.values().copied(), self.liquidity_b)
    }

    /// Cost of the state after adding `delta` shares of `outcome`.
    pub fn cost_with(&self, outcome: &Outcome, delta: f64) -> f64 {
        let shifted = self
            .shares
            .iter()
            .map(|(o, q)| if o == outcome { q + delta } else { *q });
        lmsr_cost(shifted, self.liquidity_b)
    }

    pub fn probabilities(&self) -> BTreeMap<Outcome, f64> {
        let b = self.liquidity_b;
        let max = self
            .shares
            .values()
            .map(|q| q / b)
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<(Outcome, f64)> = self
            .shares
            .iter()
            .map(|(o, q)| (o.clone(), (q / b - max).exp()))
            .collect();
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        weights.into_iter().map(|(o, w)| (o, w / total)).collect()
    }
}

/// C(q) = b * ln(sum e^(q_i/b)), computed with the log-sum-exp shift.
pub fn lmsr_cost(shares: impl Iterator<Item = f64> + Clone, b: f64) -> f64 {
    let max = shares.clone().map(|q| q / b).fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = shares.map(|q| (q / b - max).exp()).sum();
    b * (max + sum.ln())
}

fn check_liquidity(b: f64) -> Result<(), CurveError> {
    if b.is_finite() && b > 0.0 {
        Ok(())
    } else {
        Err(CurveError::InvalidLiquidity(b))
    }
}

/// Shares of `outcome` purchasable for `amount` against `state`.
pub fn solve_shares_for_cost(
    state: &CurveState,
    outcome: &Outcome,
    amount: f64,
) -> Result<f64, CurveError> {
    check_liquidity(state.liquidity_b)?;
    if !state.shares.contains_key(outcome) {
        return Err(CurveError::OutcomeNotOnCurve(outcome.clone()));
    }
    let base = state.cost();
    let delta_cost = |d: f64| state.cost_with(outcome, d) - base;

    let mut hi = 1.0_f64;
    let mut doublings = 0;
    while delta_cost(hi) <= amount {
        hi *= 2.0;
        doublings += 1;
        if doublings > MAX_BRACKET_DOUBLINGS || !hi.is_finite() {
            return Err(CurveError::Numerical("upper bracket diverged".to_string()));
        }
    }

    let mut lo = 0.0_f64;
    for _ in 0..BISECTION_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if delta_cost(mid) < amount {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let shares = (lo + hi) / 2.0;
    if shares.is_finite() {
        Ok(shares)
    } else {
        Err(CurveError::Numerical("non-finite share count".to_string()))
    }
}

/// Result of pricing a purchase against the curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveQuote {
    pub outcome: Outcome,
    pub amount_hbar: Decimal,
    pub shares: f64,
    /// amount / shares, 6 places
    pub average_price: Decimal,
    pub odds_before: BTreeMap<Outcome, Decimal>,
    pub odds_after: BTreeMap<Outcome, Decimal>,
    pub state_after: CurveState,
}

/// Lazily derives the curve for a market from its odds, or uniform when none exist.
pub fn ensure_curve_state(market: &Market) -> Result<CurveState, CurveError> {
    if let Some(state) = &market.curve_state {
        return Ok(state.clone());
    }
    let b = market
        .liquidity_b()
        .ok_or_else(|| CurveError::NotCurveMarket(market.id.to_string()))?;
    let odds = if market.quoted_odds().is_empty() {
        market.uniform_odds()
    } else {
        market.quoted_odds().clone()
    };
    CurveState::from_odds(b, &market.outcomes, &odds)
}

/// Percentages for a curve state in market outcome order, summing to exactly 100.
pub fn odds_from_state(market: &Market, state: &CurveState) -> Result<BTreeMap<Outcome, Decimal>, CurveError> {
    let probs = state.probabilities();
    let weights = market
        .outcomes
        .iter()
        .map(|o| {
            let p = probs.get(o).copied().unwrap_or(0.0);
            decimal_from_f64(p).ok_or_else(|| CurveError::Numerical(format!("probability of {o} is {p}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize_to_percentages(&market.outcomes, &weights))
}

/// Prices a purchase of `amount_hbar` of `outcome`. Read-only.
pub fn quote_trade(market: &Market, outcome: &Outcome, amount_hbar: Decimal) -> Result<CurveQuote, CurveError> {
    if amount_hbar <= Decimal::ZERO {
        return Err(CurveError::InvalidAmount(amount_hbar));
    }
    market.require_outcome(outcome)?;
    if let Some(b) = market.liquidity_b() {
        check_liquidity(b)?;
    }

    let state = ensure_curve_state(market)?;
    let amount = round_hbar(amount_hbar);
    let shares = solve_shares_for_cost(&state, outcome, decimal_to_f64(amount))?;

    let odds_before = odds_from_state(market, &state)?;
    let mut state_after = state;
    if let Some(q) = state_after.shares.get_mut(outcome) {
        *q += shares;
    }
    let odds_after = odds_from_state(market, &state_after)?;

    let shares_dec =
        decimal_from_f64(shares).ok_or_else(|| CurveError::Numerical("share count".to_string()))?;
    let average_price = if shares_dec.is_zero() {
        Decimal::ZERO
    } else {
        round_probability(amount / shares_dec)
    };

    Ok(CurveQuote {
        outcome: outcome.clone(),
        amount_hbar: amount,
        shares,
        average_price,
        odds_before,
        odds_after,
        state_after,
    })
}

/// Implied probability of one outcome in percentage terms, for logs and checks.
pub fn percent_of(odds: &BTreeMap<Outcome, Decimal>, outcome: &Outcome) -> Decimal {
    odds.get(outcome).copied().unwrap_or(dec!(0))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    #[error("Trade amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Liquidity parameter must be positive, got {0}")]
    InvalidLiquidity(f64),

    #[error("Market {0} is not a curve market")]
    NotCurveMarket(String),

    #[error("Account id is empty")]
    EmptyAccountId,

    #[error("Outcome {0} has no curve shares")]
    OutcomeNotOnCurve(Outcome),

    #[error("Curve numerical failure: {0}")]
    Numerical(String),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Oracle(#[from] crate::mark_price::OracleError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hbar, MarketId, Timestamp};
    use rust_decimal_macros::dec;

    fn yes() -> Outcome {
        Outcome::new("YES")
    }

    fn no() -> Outcome {
        Outcome::new("NO")
    }

    fn curve_market(b: f64) -> Market {
        Market::curve(
            MarketId::new("m1"),
            vec![yes(), no()],
            Timestamp(1_000_000),
            b,
            Hbar::new(dec!(1000)),
        )
    }

    #[test]
    fn uniform_state_prices_evenly() {
        let state = ensure_curve_state(&curve_market(25.0)).unwrap();
        let probs = state.probabilities();
        assert!((probs[&yes()] - 0.5).abs() < 1e-12);
        assert!((probs[&no()] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn seeded_state_reproduces_odds() {
        let mut odds = BTreeMap::new();
        odds.insert(yes(), dec!(70));
        odds.insert(no(), dec!(30));
        let market = curve_market(50.0).with_initial_odds(odds);
        let state = ensure_curve_state(&market).unwrap();
        let probs = state.probabilities();
        assert!((probs[&yes()] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn solved_shares_cost_the_requested_amount() {
        let state = ensure_curve_state(&curve_market(25.0)).unwrap();
        let shares = solve_shares_for_cost(&state, &yes(), 10.0).unwrap();
        let spent = state.cost_with(&yes(), shares) - state.cost();
        assert!((spent - 10.0).abs() < 1e-9);
        // prices are below 1, so each hbar buys more than one share
        assert!(shares > 10.0);
    }

    #[test]
    fn buying_yes_moves_odds() {
        let quote = quote_trade(&curve_market(25.0), &yes(), dec!(10)).unwrap();
        assert!(percent_of(&quote.odds_after, &yes()) > dec!(50));
        assert!(percent_of(&quote.odds_after, &no()) < dec!(50));
        let total: Decimal = quote.odds_after.values().copied().sum();
        assert_eq!(total, dec!(100));
        assert!(quote.average_price > dec!(0.5) && quote.average_price < dec!(1));
    }

    #[test]
    fn rejects_bad_inputs_before_pricing() {
        let market = curve_market(25.0);
        assert!(matches!(
            quote_trade(&market, &yes(), dec!(0)),
            Err(CurveError::InvalidAmount(_))
        ));
        assert!(matches!(
            quote_trade(&market, &Outcome::new("MAYBE"), dec!(5)),
            Err(CurveError::Market(MarketError::UnknownOutcome { .. }))
        ));
        assert!(matches!(
            quote_trade(&curve_market(-1.0), &yes(), dec!(5)),
            Err(CurveError::InvalidLiquidity(_))
        ));
    }

    #[test]
    fn clob_market_has_no_curve() {
        let market = Market::clob(MarketId::new("c1"), vec![yes(), no()], Timestamp(1));
        assert!(matches!(
            quote_trade(&market, &yes(), dec!(5)),
            Err(CurveError::NotCurveMarket(_))
        ));
    }

    #[test]
    fn cost_is_stable_for_large_share_counts() {
        let mut state = ensure_curve_state(&curve_market(1.0)).unwrap();
        state.shares.insert(yes(), 5_000.0);
        assert!(state.cost().is_finite());
        assert!(state.probabilities()[&yes()] > 0.999);
    }
}

// 13.0: mark price derivation. median of index, last trade and EMA.
// a single extreme print cannot move the mark unless a second input agrees with it.

use crate::market::{Market, MarketError};
use crate::types::{decimal_from_f64, round_probability, MarketId, Outcome, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const PRICE_FLOOR: Decimal = dec!(0.001);
pub const PRICE_CEILING: Decimal = dec!(0.999);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleParams {
    pub ema_half_life_ms: i64,
    pub price_floor: Decimal,
    pub price_ceiling: Decimal,
}

impl Default for OracleParams {
    fn default() -> Self {
        Self {
            ema_half_life_ms: 150_000,
            price_floor: PRICE_FLOOR,
            price_ceiling: PRICE_CEILING,
        }
    }
}

/// (market, outcome) key for every per-outcome series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceKey {
    pub market_id: MarketId,
    pub outcome: Outcome,
}

impl PriceKey {
    pub fn new(market_id: MarketId, outcome: Outcome) -> Self {
        Self { market_id, outcome }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market_id, self.outcome)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub index_price: Decimal,
    pub mark_price: Decimal,
    pub last_trade_price: Decimal,
    pub ema_price: Decimal,
    pub updated_at: Timestamp,
    /// Time of the last EMA step, None until the first trade
    pub last_trade_at: Option<Timestamp>,
}

pub fn clamp_price(value: Decimal, params: &OracleParams) -> Decimal {
    value.max(params.price_floor).min(params.price_ceiling)
}

pub fn median3(a: Decimal, b: Decimal, c: Decimal) -> Decimal {
    a.max(b).min(a.min(b).max(c))
}

/// alpha = 1 - exp(-ln2 * elapsed / half_life)
pub fn ema_alpha(elapsed_ms: i64, half_life_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return 0.0;
    }
    if half_life_ms <= 0 {
        return 1.0;
    }
    1.0 - (-std::f64::consts::LN_2 * elapsed_ms as f64 / half_life_ms as f64).exp()
}

/// One EMA step toward `trade`. No-op when no time has passed.
pub fn update_ema(ema: Decimal, trade: Decimal, elapsed_ms: i64, half_life_ms: i64) -> Decimal {
    if elapsed_ms <= 0 {
        return ema;
    }
    let alpha = decimal_from_f64(ema_alpha(elapsed_ms, half_life_ms)).unwrap_or(Decimal::ONE);
    round_probability(ema + alpha * (trade - ema))
}

/// mark = median3(index, last, ema), every input clamped first.
pub fn compute_mark(index: Decimal, last_trade: Decimal, ema: Decimal, params: &OracleParams) -> Decimal {
    let index = clamp_price(index, params);
    let last_trade = clamp_price(last_trade, params);
    let ema = clamp_price(ema, params);
    round_probability(median3(index, last_trade, ema))
}

/// Per-key price snapshots. Mutated only through this type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceOracle {
    params: OracleParams,
    #[serde(with = "crate::types::map_entries")]
    snapshots: BTreeMap<PriceKey, PriceSnapshot>,
}

impl PriceOracle {
    pub fn new(params: OracleParams) -> Self {
        Self {
            params,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &OracleParams {
        &self.params
    }

    pub fn snapshot(&self, key: &PriceKey) -> Option<&PriceSnapshot> {
        self.snapshots.get(key)
    }

    pub fn snapshots(&self) -> &BTreeMap<PriceKey, PriceSnapshot> {
        &self.snapshots
    }

    pub fn restore(&mut self, snapshots: BTreeMap<PriceKey, PriceSnapshot>) {
        self.snapshots = snapshots;
    }

    fn index_for(&self, market: &Market, outcome: &Outcome) -> Result<Decimal, OracleError> {
        market.require_outcome(outcome)?;
        Ok(round_probability(clamp_price(market.implied_probability(outcome), &self.params)))
    }

    /// Recomputes the snapshot from the market's current index. Last trade and EMA
    /// default to the index until a trade is recorded.
    pub fn compute_mark_price(
        &mut self,
        market: &Market,
        outcome: &Outcome,
        now: Timestamp,
    ) -> Result<PriceSnapshot, OracleError> {
        let index = self.index_for(market, outcome)?;
        let key = PriceKey::new(market.id.clone(), outcome.clone());
        let previous = self.snapshots.get(&key);

        let last_trade = previous.map(|s| s.last_trade_price).unwrap_or(index);
        let ema = previous.map(|s| s.ema_price).unwrap_or(index);
        let last_trade_at = previous.and_then(|s| s.last_trade_at);

        let snapshot = PriceSnapshot {
            index_price: index,
            mark_price: compute_mark(index, last_trade, ema, &self.params),
            last_trade_price: clamp_price(last_trade, &self.params),
            ema_price: clamp_price(ema, &self.params),
            updated_at: now,
            last_trade_at,
        };
        self.snapshots.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Cached snapshot, or a fresh one when none exists yet.
    pub fn get_mark_price(
        &mut self,
        market: &Market,
        outcome: &Outcome,
        now: Timestamp,
    ) -> Result<PriceSnapshot, OracleError> {
        let key = PriceKey::new(market.id.clone(), outcome.clone());
        if let Some(existing) = self.snapshots.get(&key) {
            return Ok(existing.clone());
        }
        self.compute_mark_price(market, outcome, now)
    }

    /// Feeds a trade print into last-trade and the EMA, then recomputes the mark.
    /// Callers supply monotonic time per key; a non-positive gap leaves the EMA as is.
    pub fn record_trade(
        &mut self,
        market: &Market,
        outcome: &Outcome,
        trade_price: Decimal,
        now: Timestamp,
    ) -> Result<PriceSnapshot, OracleError> {
        if trade_price <= Decimal::ZERO || trade_price > Decimal::ONE {
            return Err(OracleError::InvalidTradePrice(trade_price));
        }
        let index = self.index_for(market, outcome)?;
        let trade = round_probability(clamp_price(trade_price, &self.params));
        let key = PriceKey::new(market.id.clone(), outcome.clone());

        let ema = match self.snapshots.get(&key) {
            Some(prev) => {
                // before the first print the average decays from the index-derived value
                let since = prev.last_trade_at.unwrap_or(prev.updated_at);
                update_ema(prev.ema_price, trade, since.millis_until(&now), self.params.ema_half_life_ms)
            }
            // a first print starts the average at the index, as an unread pair would
            None => index,
        };
        let ema = clamp_price(ema, &self.params);

        let snapshot = PriceSnapshot {
            index_price: index,
            mark_price: compute_mark(index, trade, ema, &self.params),
            last_trade_price: trade,
            ema_price: ema,
            updated_at: now,
            last_trade_at: Some(now),
        };
        self.snapshots.insert(key, snapshot.clone());
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("Trade price must be in (0, 1], got {0}")]
    InvalidTradePrice(Decimal),

    #[error(transparent)]
    Market(#[from] MarketError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hbar;
    use rust_decimal_macros::dec;

    fn market_with_yes(pct: Decimal) -> Market {
        let mut odds = BTreeMap::new();
        odds.insert(Outcome::new("YES"), pct);
        odds.insert(Outcome::new("NO"), dec!(100) - pct);
        let mut m = Market::curve(
            MarketId::new("m1"),
            vec![Outcome::new("YES"), Outcome::new("NO")],
            Timestamp(10_000_000),
            25.0,
            Hbar::new(dec!(100)),
        );
        m.current_odds = odds;
        m
    }

    #[test]
    fn median_of_three() {
        assert_eq!(median3(dec!(0.1), dec!(0.5), dec!(0.9)), dec!(0.5));
        assert_eq!(median3(dec!(0.9), dec!(0.1), dec!(0.5)), dec!(0.5));
        assert_eq!(median3(dec!(0.5), dec!(0.9), dec!(0.1)), dec!(0.5));
        assert_eq!(median3(dec!(0.4), dec!(0.4), dec!(0.9)), dec!(0.4));
    }

    #[test]
    fn mark_is_clamped() {
        let params = OracleParams::default();
        assert_eq!(compute_mark(dec!(0), dec!(0), dec!(0), &params), dec!(0.001));
        assert_eq!(compute_mark(dec!(1), dec!(5), dec!(1), &params), dec!(0.999));
    }

    #[test]
    fn ema_half_life() {
        // after exactly one half-life the average closes half the gap
        assert!((ema_alpha(150_000, 150_000) - 0.5).abs() < 1e-12);
        assert_eq!(update_ema(dec!(0.4), dec!(0.6), 150_000, 150_000), dec!(0.5));
        assert_eq!(update_ema(dec!(0.4), dec!(0.6), 0, 150_000), dec!(0.4));
        assert_eq!(update_ema(dec!(0.4), dec!(0.6), -5, 150_000), dec!(0.4));
    }

    #[test]
    fn fresh_mark_tracks_index() {
        let mut oracle = PriceOracle::new(OracleParams::default());
        let market = market_with_yes(dec!(40));
        let snap = oracle.compute_mark_price(&market, &Outcome::new("YES"), Timestamp(0)).unwrap();
        assert_eq!(snap.index_price, dec!(0.4));
        assert_eq!(snap.mark_price, dec!(0.4));
        assert_eq!(snap.ema_price, dec!(0.4));
    }

    #[test]
    fn single_outlier_trade_cannot_move_mark() {
        let mut oracle = PriceOracle::new(OracleParams::default());
        let market = market_with_yes(dec!(40));
        let yes = Outcome::new("YES");
        oracle.compute_mark_price(&market, &yes, Timestamp(0)).unwrap();

        // trade at 0.99 immediately: ema barely moves, index unchanged
        let snap = oracle.record_trade(&market, &yes, dec!(0.99), Timestamp(1)).unwrap();
        assert_eq!(snap.last_trade_price, dec!(0.99));
        assert!(snap.ema_price < dec!(0.41));
        assert_eq!(snap.mark_price, snap.ema_price.max(dec!(0.4)).min(dec!(0.99)));
        assert!(snap.mark_price < dec!(0.41));
    }

    #[test]
    fn first_print_on_fresh_pair_cannot_move_mark() {
        let market = market_with_yes(dec!(50));
        let yes = Outcome::new("YES");

        let mut traded_first = PriceOracle::new(OracleParams::default());
        let snap = traded_first.record_trade(&market, &yes, dec!(0.99), Timestamp(1)).unwrap();
        assert_eq!(snap.last_trade_price, dec!(0.99));
        assert_eq!(snap.ema_price, dec!(0.5));
        assert_eq!(snap.mark_price, dec!(0.5));

        // same result when the mark is read before the print
        let mut read_first = PriceOracle::new(OracleParams::default());
        read_first.compute_mark_price(&market, &yes, Timestamp(1)).unwrap();
        let other = read_first.record_trade(&market, &yes, dec!(0.99), Timestamp(1)).unwrap();
        assert_eq!(other.mark_price, snap.mark_price);
        assert_eq!(other.ema_price, snap.ema_price);
    }

    #[test]
    fn get_mark_price_uses_cache() {
        let mut oracle = PriceOracle::new(OracleParams::default());
        let yes = Outcome::new("YES");
        let first = oracle.get_mark_price(&market_with_yes(dec!(40)), &yes, Timestamp(0)).unwrap();
        // index moved but the cached snapshot is returned
        let cached = oracle.get_mark_price(&market_with_yes(dec!(70)), &yes, Timestamp(5)).unwrap();
        assert_eq!(first, cached);
        let fresh = oracle.compute_mark_price(&market_with_yes(dec!(70)), &yes, Timestamp(5)).unwrap();
        assert_eq!(fresh.index_price, dec!(0.7));
    }

    #[test]
    fn rejects_unknown_outcome_and_bad_prints() {
        let mut oracle = PriceOracle::new(OracleParams::default());
        let market = market_with_yes(dec!(40));
        assert!(matches!(
            oracle.compute_mark_price(&market, &Outcome::new("MAYBE"), Timestamp(0)),
            Err(OracleError::Market(_))
        ));
        assert!(matches!(
            oracle.record_trade(&market, &Outcome::new("YES"), dec!(1.5), Timestamp(0)),
            Err(OracleError::InvalidTradePrice(_))
        ));
    }
}

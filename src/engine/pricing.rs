//! Mark price operations.

use super::core::Engine;
use crate::events::EventPayload;
use crate::mark_price::{OracleError, PriceKey, PriceSnapshot};
use crate::market::MarketError;
use crate::types::{MarketId, Outcome};
use rust_decimal::Decimal;
use tracing::debug;

impl Engine {
    /// Recompute the mark from the market's current odds.
    pub fn compute_mark_price(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<PriceSnapshot, OracleError> {
        let market = self
            .markets
            .get(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))?;
        let snapshot = self.oracle.compute_mark_price(market, outcome, self.current_time)?;
        self.emit_mark_update(market_id, outcome, &snapshot);
        Ok(snapshot)
    }

    /// Cached mark, or a fresh computation when the key has none yet.
    pub fn get_mark_price(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<PriceSnapshot, OracleError> {
        let key = PriceKey::new(market_id.clone(), outcome.clone());
        if let Some(snapshot) = self.oracle.snapshot(&key) {
            return Ok(snapshot.clone());
        }
        self.compute_mark_price(market_id, outcome)
    }

    pub fn price_snapshot(&self, market_id: &MarketId, outcome: &Outcome) -> Option<&PriceSnapshot> {
        self.oracle.snapshot(&PriceKey::new(market_id.clone(), outcome.clone()))
    }

    /// Feed an executed trade price into last-trade and the EMA.
    pub fn record_trade(
        &mut self,
        market_id: &MarketId,
        outcome: &Outcome,
        price: Decimal,
    ) -> Result<PriceSnapshot, OracleError> {
        let market = self
            .markets
            .get(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))?;
        let snapshot = self.oracle.record_trade(market, outcome, price, self.current_time)?;
        self.emit_mark_update(market_id, outcome, &snapshot);
        Ok(snapshot)
    }

    fn emit_mark_update(&mut self, market_id: &MarketId, outcome: &Outcome, snapshot: &PriceSnapshot) {
        debug!(
            market = %market_id,
            outcome = %outcome,
            index = %snapshot.index_price,
            last_trade = %snapshot.last_trade_price,
            ema = %snapshot.ema_price,
            mark = %snapshot.mark_price,
            "mark price updated"
        );
        self.emit_event(EventPayload::MarkPriceUpdated {
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            index_price: snapshot.index_price,
            mark_price: snapshot.mark_price,
            last_trade_price: snapshot.last_trade_price,
            ema_price: snapshot.ema_price,
        });
    }
}

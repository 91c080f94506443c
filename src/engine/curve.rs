//! LMSR curve trades.

use super::core::Engine;
use super::results::CurveTradeResult;
use crate::amm::{quote_trade, CurveError, CurveQuote};
use crate::events::EventPayload;
use crate::market::MarketError;
use crate::types::{AccountId, MarketId, Outcome};
use rust_decimal::Decimal;
use tracing::{debug, info};

impl Engine {
    /// Price a purchase without touching state.
    pub fn quote_curve_trade(
        &self,
        market_id: &MarketId,
        outcome: &Outcome,
        amount_hbar: Decimal,
    ) -> Result<CurveQuote, CurveError> {
        let market = self.market(market_id)?;
        let quote = quote_trade(market, outcome, amount_hbar)?;
        debug!(
            market = %market_id,
            outcome = %outcome,
            amount = %quote.amount_hbar,
            shares = quote.shares,
            avg_price = %quote.average_price,
            "curve quote"
        );
        Ok(quote)
    }

    /// Buys `amount_hbar` of `outcome` from the curve. Shares and odds are written back
    /// to the market and the average fill is recorded with the oracle as the last trade.
    pub fn execute_curve_trade(
        &mut self,
        account_id: &AccountId,
        market_id: &MarketId,
        outcome: &Outcome,
        amount_hbar: Decimal,
    ) -> Result<CurveTradeResult, CurveError> {
        if account_id.is_empty() {
            return Err(CurveError::EmptyAccountId);
        }
        let market = self.market(market_id)?;
        market.require_open()?;
        let quote = quote_trade(market, outcome, amount_hbar)?;

        let market = self
            .markets
            .get_mut(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))?;
        market.curve_state = Some(quote.state_after.clone());
        market.current_odds = quote.odds_after.clone();

        info!(
            account = %account_id,
            market = %market_id,
            outcome = %outcome,
            amount = %quote.amount_hbar,
            shares = quote.shares,
            "curve trade executed"
        );
        self.emit_event(EventPayload::CurveTrade {
            market_id: market_id.clone(),
            account_id: account_id.clone(),
            outcome: outcome.clone(),
            amount_hbar: quote.amount_hbar,
            shares: quote.shares,
            average_price: quote.average_price,
            odds_after: quote.odds_after.clone(),
        });

        // the oracle clamps, and an average above 1 cannot happen on a funded curve
        let fill = quote.average_price.min(Decimal::ONE);
        let mark_price = if fill > Decimal::ZERO {
            self.record_trade(market_id, outcome, fill)?.mark_price
        } else {
            self.compute_mark_price(market_id, outcome)?.mark_price
        };

        Ok(CurveTradeResult { quote, mark_price })
    }
}

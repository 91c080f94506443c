//! Quote book operations for CLOB markets.

use super::core::Engine;
use crate::events::EventPayload;
use crate::market::{LiquidityModel, MarketError};
use crate::order::{compute_initial_clob_odds, MarketOrder, OrderBookView, OrderError, OrderEvent, OrderRequest, OrderStatus};
use crate::types::{AccountId, MarketId, OrderId, Outcome};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

impl Engine {
    pub fn publish_order(&mut self, request: OrderRequest) -> Result<MarketOrder, OrderError> {
        let market = self
            .markets
            .get(&request.market_id)
            .ok_or_else(|| MarketError::NotFound(request.market_id.clone()))?;
        let order = self.order_book.publish(market, request, self.current_time)?;

        info!(
            order = %order.id,
            market = %order.market_id,
            outcome = %order.outcome,
            side = ?order.side,
            price = %order.price,
            quantity = %order.quantity,
            "order published"
        );
        self.emit_event(EventPayload::OrderPublished { order: order.clone() });
        Ok(order)
    }

    /// Owner-only. Cancelling an already-cancelled order changes nothing.
    pub fn cancel_order(&mut self, order_id: OrderId, account_id: &AccountId) -> Result<MarketOrder, OrderError> {
        let was_open = self
            .order_book
            .get(order_id)
            .map(MarketOrder::is_open)
            .unwrap_or(false);
        let order = self.order_book.cancel(order_id, account_id)?;

        if was_open && order.status == OrderStatus::Cancelled {
            info!(order = %order_id, account = %account_id, "order cancelled");
            self.emit_event(EventPayload::OrderCancelled {
                order_id,
                market_id: order.market_id.clone(),
                account_id: account_id.clone(),
            });
        }
        Ok(order)
    }

    /// Open bids and asks in creation order, merged with externally replayed events.
    pub fn get_order_book(&self, market_id: &MarketId, replayed: &[OrderEvent]) -> Result<OrderBookView, OrderError> {
        self.market(market_id)?;
        Ok(self.order_book.view(market_id, replayed))
    }

    pub fn get_orders(&self, account_id: &AccountId) -> Vec<MarketOrder> {
        self.order_book.orders_for_account(account_id).cloned().collect()
    }

    pub fn compute_initial_clob_odds(
        &self,
        market_id: &MarketId,
        replayed: &[OrderEvent],
    ) -> Result<Option<BTreeMap<Outcome, Decimal>>, OrderError> {
        let market = self.market(market_id)?;
        let view = self.order_book.view(market_id, replayed);
        Ok(compute_initial_clob_odds(market, &view))
    }

    /// Writes the midpoint seed into the market's odds. Returns None, leaving the
    /// market untouched, when no outcome is quoted on both sides.
    pub fn seed_clob_odds(
        &mut self,
        market_id: &MarketId,
        replayed: &[OrderEvent],
    ) -> Result<Option<BTreeMap<Outcome, Decimal>>, OrderError> {
        let market = self.market(market_id)?;
        if !matches!(market.liquidity, LiquidityModel::Clob) {
            return Err(OrderError::NotClobMarket(market_id.clone()));
        }
        let Some(odds) = self.compute_initial_clob_odds(market_id, replayed)? else {
            return Ok(None);
        };

        if let Some(market) = self.markets.get_mut(market_id) {
            if market.initial_odds.is_empty() {
                market.initial_odds = odds.clone();
            }
            market.current_odds = odds.clone();
        }
        info!(market = %market_id, "odds seeded from quotes");
        self.emit_event(EventPayload::OddsSeeded {
            market_id: market_id.clone(),
            odds: odds.clone(),
        });
        Ok(Some(odds))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::market::Market;
    use crate::order::{OrderSide, OrderRequest};
    use crate::types::{AccountId, MarketId, Outcome, Timestamp};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn setup() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine
            .add_market(Market::clob(
                MarketId::new("c1"),
                vec![Outcome::new("YES"), Outcome::new("NO")],
                Timestamp(100_000_000),
            ))
            .unwrap();
        engine
    }

    fn quote(engine: &mut Engine, side: OrderSide, outcome: &str, price: Decimal) {
        engine
            .publish_order(OrderRequest {
                account_id: AccountId::new("0.0.5"),
                market_id: MarketId::new("c1"),
                outcome: Outcome::new(outcome),
                side,
                quantity: dec!(10),
                price,
            })
            .unwrap();
    }

    #[test]
    fn seeding_writes_midpoints() {
        let mut engine = setup();
        quote(&mut engine, OrderSide::Bid, "YES", dec!(0.58));
        quote(&mut engine, OrderSide::Ask, "YES", dec!(0.62));
        quote(&mut engine, OrderSide::Bid, "NO", dec!(0.38));
        quote(&mut engine, OrderSide::Ask, "NO", dec!(0.42));

        let odds = engine.seed_clob_odds(&MarketId::new("c1"), &[]).unwrap().unwrap();
        assert_eq!(odds[&Outcome::new("YES")], dec!(60));
        assert_eq!(odds[&Outcome::new("NO")], dec!(40));

        let market = engine.get_market(&MarketId::new("c1")).unwrap();
        assert_eq!(market.current_odds, odds);
        assert_eq!(market.implied_probability(&Outcome::new("YES")), dec!(0.6));
    }

    #[test]
    fn seeding_without_two_sided_quotes_is_noop() {
        let mut engine = setup();
        quote(&mut engine, OrderSide::Bid, "YES", dec!(0.58));
        assert!(engine.seed_clob_odds(&MarketId::new("c1"), &[]).unwrap().is_none());
        assert!(engine.get_market(&MarketId::new("c1")).unwrap().current_odds.is_empty());
    }

    #[test]
    fn repeated_cancel_emits_once() {
        let mut engine = setup();
        quote(&mut engine, OrderSide::Bid, "YES", dec!(0.5));
        let owner = AccountId::new("0.0.5");
        let id = engine.get_orders(&owner)[0].id;
        let before = engine.events().count();
        engine.cancel_order(id, &owner).unwrap();
        engine.cancel_order(id, &owner).unwrap();
        assert_eq!(engine.events().count(), before + 1);
    }
}

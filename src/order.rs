//! Resting-order log for CLOB markets.
//!
//! This is a quoting structure, not a matching engine. Orders are published and
//! cancelled; nothing here crosses bids against asks. The book view is returned in
//! creation order and pricing it is left to the caller. The only price-aware logic is
//! the midpoint seed used to derive a CLOB market's initial odds.

use crate::market::{normalize_to_percentages, Market, MarketError};
use crate::types::{AccountId, MarketId, OrderId, Outcome, ParseEnumError, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Bid,
    Ask,
}

impl FromStr for OrderSide {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BID" | "BUY" => Ok(OrderSide::Bid),
            "ASK" | "SELL" => Ok(OrderSide::Ask),
            _ => Err(ParseEnumError { kind: "order side", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub id: OrderId,
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub created_at: Timestamp,
}

impl MarketOrder {
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

/// Order published by a caller. Id and timestamp are assigned by the book.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

/// Order state replayed from an external event stream. Last status per id wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order: MarketOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub market_id: Option<MarketId>,
    /// Open bids in creation order
    pub bids: Vec<MarketOrder>,
    /// Open asks in creation order
    pub asks: Vec<MarketOrder>,
}

/// Append-only order log across all markets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(with = "crate::types::map_entries")]
    orders: BTreeMap<OrderId, MarketOrder>,
    next_order_id: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            next_order_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn get(&self, order_id: OrderId) -> Option<&MarketOrder> {
        self.orders.get(&order_id)
    }

    pub fn orders(&self) -> impl Iterator<Item = &MarketOrder> {
        self.orders.values()
    }

    pub fn orders_for_account<'a>(&'a self, account_id: &'a AccountId) -> impl Iterator<Item = &'a MarketOrder> + 'a {
        self.orders.values().filter(move |o| &o.account_id == account_id)
    }

    fn next_id(&mut self) -> OrderId {
        // restored books may carry a zero counter
        if self.next_order_id == 0 {
            self.next_order_id = self.orders.keys().next_back().map(|id| id.0 + 1).unwrap_or(1);
        }
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    /// Validates and appends an order with status OPEN.
    pub fn publish(
        &mut self,
        market: &Market,
        request: OrderRequest,
        now: Timestamp,
    ) -> Result<MarketOrder, OrderError> {
        validate_request(market, &request)?;

        let order = MarketOrder {
            id: self.next_id(),
            market_id: request.market_id,
            account_id: request.account_id,
            outcome: request.outcome,
            side: request.side,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Open,
            created_at: now,
        };
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    /// Cancels an order owned by `account_id`. Already-cancelled orders are returned unchanged.
    pub fn cancel(&mut self, order_id: OrderId, account_id: &AccountId) -> Result<MarketOrder, OrderError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::NotFound(order_id))?;

        if &order.account_id != account_id {
            return Err(OrderError::NotOwner {
                order_id,
                owner: order.account_id.clone(),
                requested_by: account_id.clone(),
            });
        }

        order.status = OrderStatus::Cancelled;
        Ok(order.clone())
    }

    /// Open bids/asks for a market after merging replayed events over the local log.
    pub fn view(&self, market_id: &MarketId, replayed: &[OrderEvent]) -> OrderBookView {
        let mut merged: BTreeMap<OrderId, MarketOrder> = self
            .orders
            .values()
            .filter(|o| &o.market_id == market_id)
            .map(|o| (o.id, o.clone()))
            .collect();

        for event in replayed.iter().filter(|e| &e.order.market_id == market_id) {
            merged.insert(event.order.id, event.order.clone());
        }

        let mut open: Vec<MarketOrder> = merged.into_values().filter(MarketOrder::is_open).collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let (bids, asks): (Vec<MarketOrder>, Vec<MarketOrder>) =
            open.into_iter().partition(|o| o.side == OrderSide::Bid);
        OrderBookView {
            market_id: Some(market_id.clone()),
            bids,
            asks,
        }
    }
}

fn validate_request(market: &Market, request: &OrderRequest) -> Result<(), OrderError> {
    if request.account_id.is_empty() {
        return Err(OrderError::EmptyAccountId);
    }
    if request.quantity <= Decimal::ZERO {
        return Err(OrderError::InvalidQuantity(request.quantity));
    }
    if request.price <= Decimal::ZERO || request.price > Decimal::ONE {
        return Err(OrderError::InvalidPrice(request.price));
    }
    market.require_open()?;
    market.require_outcome(&request.outcome)?;
    Ok(())
}

/// Best bid (highest) and best ask (lowest) price for one outcome.
pub fn best_quotes(view: &OrderBookView, outcome: &Outcome) -> (Option<Decimal>, Option<Decimal>) {
    let best_bid = view
        .bids
        .iter()
        .filter(|o| &o.outcome == outcome)
        .map(|o| o.price)
        .max();
    let best_ask = view
        .asks
        .iter()
        .filter(|o| &o.outcome == outcome)
        .map(|o| o.price)
        .min();
    (best_bid, best_ask)
}

/// Seeds odds from the bid/ask midpoint of each outcome.
///
/// Outcomes quoted on both sides use their midpoint; the rest fall back to the
/// market's current implied probability. Returns None when no outcome has a midpoint.
pub fn compute_initial_clob_odds(market: &Market, view: &OrderBookView) -> Option<BTreeMap<Outcome, Decimal>> {
    let mut any_mid = false;
    let weights: Vec<Decimal> = market
        .outcomes
        .iter()
        .map(|outcome| match best_quotes(view, outcome) {
            (Some(bid), Some(ask)) => {
                any_mid = true;
                (bid + ask) / dec!(2)
            }
            _ => market.implied_probability(outcome),
        })
        .collect();

    if !any_mid {
        return None;
    }
    Some(normalize_to_percentages(&market.outcomes, &weights))
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("Order price must be in (0, 1], got {0}")]
    InvalidPrice(Decimal),

    #[error("Account id is empty")]
    EmptyAccountId,

    #[error("Order {0} not found")]
    NotFound(OrderId),

    #[error("Order {order_id} belongs to {owner}, not {requested_by}")]
    NotOwner {
        order_id: OrderId,
        owner: AccountId,
        requested_by: AccountId,
    },

    #[error("Market {0} does not seed odds from quotes")]
    NotClobMarket(MarketId),

    #[error(transparent)]
    InvalidSide(#[from] ParseEnumError),

    #[error(transparent)]
    Market(#[from] MarketError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market() -> Market {
        Market::clob(
            MarketId::new("c1"),
            vec![Outcome::new("YES"), Outcome::new("NO")],
            Timestamp(10_000_000),
        )
    }

    fn request(side: OrderSide, outcome: &str, price: Decimal) -> OrderRequest {
        OrderRequest {
            account_id: AccountId::new("0.0.1"),
            market_id: MarketId::new("c1"),
            outcome: Outcome::new(outcome),
            side,
            quantity: dec!(10),
            price,
        }
    }

    #[test]
    fn publish_validates_inputs() {
        let mut book = OrderBook::new();
        let m = market();

        let mut bad_qty = request(OrderSide::Bid, "YES", dec!(0.5));
        bad_qty.quantity = dec!(0);
        assert!(matches!(book.publish(&m, bad_qty, Timestamp(1)), Err(OrderError::InvalidQuantity(_))));

        assert!(matches!(
            book.publish(&m, request(OrderSide::Bid, "YES", dec!(1.01)), Timestamp(1)),
            Err(OrderError::InvalidPrice(_))
        ));
        assert!(matches!(
            book.publish(&m, request(OrderSide::Bid, "YES", dec!(0)), Timestamp(1)),
            Err(OrderError::InvalidPrice(_))
        ));
        assert!(matches!(
            book.publish(&m, request(OrderSide::Bid, "MAYBE", dec!(0.5)), Timestamp(1)),
            Err(OrderError::Market(MarketError::UnknownOutcome { .. }))
        ));
        assert!(book.is_empty());

        // price of exactly 1 is allowed
        assert!(book.publish(&m, request(OrderSide::Ask, "YES", dec!(1)), Timestamp(1)).is_ok());
    }

    #[test]
    fn cancel_requires_owner_and_is_idempotent() {
        let mut book = OrderBook::new();
        let order = book.publish(&market(), request(OrderSide::Bid, "YES", dec!(0.4)), Timestamp(1)).unwrap();

        let stranger = AccountId::new("0.0.2");
        assert!(matches!(book.cancel(order.id, &stranger), Err(OrderError::NotOwner { .. })));

        let owner = AccountId::new("0.0.1");
        assert_eq!(book.cancel(order.id, &owner).unwrap().status, OrderStatus::Cancelled);
        assert_eq!(book.cancel(order.id, &owner).unwrap().status, OrderStatus::Cancelled);
        assert!(matches!(book.cancel(OrderId(99), &owner), Err(OrderError::NotFound(_))));
    }

    #[test]
    fn view_is_creation_ordered_not_price_ordered() {
        let mut book = OrderBook::new();
        let m = market();
        book.publish(&m, request(OrderSide::Bid, "YES", dec!(0.30)), Timestamp(1)).unwrap();
        book.publish(&m, request(OrderSide::Bid, "YES", dec!(0.45)), Timestamp(2)).unwrap();
        book.publish(&m, request(OrderSide::Bid, "YES", dec!(0.35)), Timestamp(3)).unwrap();

        let view = book.view(&m.id, &[]);
        let prices: Vec<Decimal> = view.bids.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![dec!(0.30), dec!(0.45), dec!(0.35)]);
        assert!(view.asks.is_empty());
    }

    #[test]
    fn replayed_events_override_local_status() {
        let mut book = OrderBook::new();
        let m = market();
        let local = book.publish(&m, request(OrderSide::Ask, "YES", dec!(0.6)), Timestamp(1)).unwrap();

        let mut cancelled = local.clone();
        cancelled.status = OrderStatus::Cancelled;
        let mut remote = local.clone();
        remote.id = OrderId(500);
        remote.created_at = Timestamp(0);

        let view = book.view(&m.id, &[OrderEvent { order: cancelled }, OrderEvent { order: remote }]);
        assert_eq!(view.asks.len(), 1);
        assert_eq!(view.asks[0].id, OrderId(500));
    }

    #[test]
    fn midpoint_seed_normalizes_to_100() {
        let mut book = OrderBook::new();
        let m = market();
        book.publish(&m, request(OrderSide::Bid, "YES", dec!(0.58)), Timestamp(1)).unwrap();
        book.publish(&m, request(OrderSide::Ask, "YES", dec!(0.62)), Timestamp(2)).unwrap();
        book.publish(&m, request(OrderSide::Bid, "NO", dec!(0.38)), Timestamp(3)).unwrap();
        book.publish(&m, request(OrderSide::Ask, "NO", dec!(0.42)), Timestamp(4)).unwrap();

        let odds = compute_initial_clob_odds(&m, &book.view(&m.id, &[])).unwrap();
        assert_eq!(odds[&Outcome::new("YES")], dec!(60));
        assert_eq!(odds[&Outcome::new("NO")], dec!(40));
    }

    #[test]
    fn no_two_sided_quotes_means_no_seed() {
        let mut book = OrderBook::new();
        let m = market();
        book.publish(&m, request(OrderSide::Bid, "YES", dec!(0.58)), Timestamp(1)).unwrap();
        assert!(compute_initial_clob_odds(&m, &book.view(&m.id, &[])).is_none());
    }

    #[test]
    fn order_side_parses_aliases() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Bid);
        assert_eq!("ASK".parse::<OrderSide>().unwrap(), OrderSide::Ask);
        assert!("hold".parse::<OrderSide>().is_err());
    }
}

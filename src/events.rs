// 11.0: every state change produces an event. events feed the in-memory log and the audit
// outbox. the EventPayload enum lists all event types.

use crate::account::MarginMode;
use crate::liquidation::LiquidationEvent;
use crate::market::MarketStatus;
use crate::options::OptionType;
use crate::order::MarketOrder;
use crate::types::{AccountId, DerivativeId, Hbar, Leverage, MarketId, OrderId, Outcome, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // Market events
    MarketAdded {
        market_id: MarketId,
        outcomes: Vec<Outcome>,
        curve: bool,
    },
    MarketStatusChanged {
        market_id: MarketId,
        status: MarketStatus,
    },
    CurveTrade {
        market_id: MarketId,
        account_id: AccountId,
        outcome: Outcome,
        amount_hbar: Decimal,
        shares: f64,
        average_price: Decimal,
        odds_after: BTreeMap<Outcome, Decimal>,
    },

    // Quote book events
    OrderPublished {
        order: MarketOrder,
    },
    OrderCancelled {
        order_id: OrderId,
        market_id: MarketId,
        account_id: AccountId,
    },
    OddsSeeded {
        market_id: MarketId,
        odds: BTreeMap<Outcome, Decimal>,
    },
    OddsUpdated {
        market_id: MarketId,
        odds: BTreeMap<Outcome, Decimal>,
    },

    // Price events
    MarkPriceUpdated {
        market_id: MarketId,
        outcome: Outcome,
        index_price: Decimal,
        mark_price: Decimal,
        last_trade_price: Decimal,
        ema_price: Decimal,
    },

    // Margin events
    MarginDeposited {
        account_id: AccountId,
        amount: Hbar,
        balance: Hbar,
    },
    MarginWithdrawn {
        account_id: AccountId,
        amount: Hbar,
        balance: Hbar,
    },
    MarginLocked {
        account_id: AccountId,
        amount: Hbar,
        locked: Hbar,
    },
    MarginReleased {
        account_id: AccountId,
        amount: Hbar,
        locked: Hbar,
    },
    MarginModeChanged {
        account_id: AccountId,
        mode: MarginMode,
    },

    // Position events
    PositionOpened {
        position: DerivativeId,
        account_id: AccountId,
        market_id: MarketId,
        outcome: Outcome,
        side: Side,
        size_hbar: Hbar,
        leverage: Leverage,
        entry_price: Decimal,
        margin_hbar: Hbar,
        liquidation_price: Decimal,
    },
    PositionRefreshed {
        position: DerivativeId,
        mark_price: Decimal,
        unrealized_pnl_hbar: Hbar,
    },
    PositionClosed {
        position: DerivativeId,
        account_id: AccountId,
        fraction: Decimal,
        exit_price: Decimal,
        realized_pnl_hbar: Hbar,
        released_margin_hbar: Hbar,
        shortfall_hbar: Hbar,
        fully_closed: bool,
    },
    PositionLiquidated(LiquidationEvent),

    // Funding events
    FundingSettled {
        market_id: MarketId,
        outcome: Outcome,
        rate: Decimal,
        payments: usize,
        paid_by_longs: Hbar,
        paid_by_shorts: Hbar,
    },

    // Option events
    OptionWritten {
        option: DerivativeId,
        writer: AccountId,
        market_id: MarketId,
        outcome: Outcome,
        option_type: OptionType,
        strike_price: Decimal,
        size_hbar: Hbar,
        premium_hbar: Hbar,
        expiry: Timestamp,
    },
    OptionBought {
        option: DerivativeId,
        holder: AccountId,
        premium_hbar: Hbar,
    },
    OptionExercised {
        option: DerivativeId,
        holder: AccountId,
        settlement_price: Decimal,
        payoff_hbar: Hbar,
        returned_to_writer_hbar: Hbar,
        uncovered_hbar: Hbar,
    },
    OptionExpired {
        option: DerivativeId,
        writer: AccountId,
        released_hbar: Hbar,
    },
    OptionCancelled {
        option: DerivativeId,
        writer: AccountId,
        released_hbar: Hbar,
    },
    OptionRefreshed {
        option: DerivativeId,
        theoretical_premium_hbar: Hbar,
        holder_pnl_hbar: Hbar,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::MarketAdded { .. } => "market_added",
            EventPayload::MarketStatusChanged { .. } => "market_status_changed",
            EventPayload::CurveTrade { .. } => "curve_trade",
            EventPayload::OrderPublished { .. } => "order_published",
            EventPayload::OrderCancelled { .. } => "order_cancelled",
            EventPayload::OddsSeeded { .. } => "odds_seeded",
            EventPayload::OddsUpdated { .. } => "odds_updated",
            EventPayload::MarkPriceUpdated { .. } => "mark_price_updated",
            EventPayload::MarginDeposited { .. } => "margin_deposited",
            EventPayload::MarginWithdrawn { .. } => "margin_withdrawn",
            EventPayload::MarginLocked { .. } => "margin_locked",
            EventPayload::MarginReleased { .. } => "margin_released",
            EventPayload::MarginModeChanged { .. } => "margin_mode_changed",
            EventPayload::PositionOpened { .. } => "position_opened",
            EventPayload::PositionRefreshed { .. } => "position_refreshed",
            EventPayload::PositionClosed { .. } => "position_closed",
            EventPayload::PositionLiquidated(_) => "position_liquidated",
            EventPayload::FundingSettled { .. } => "funding_settled",
            EventPayload::OptionWritten { .. } => "option_written",
            EventPayload::OptionBought { .. } => "option_bought",
            EventPayload::OptionExercised { .. } => "option_exercised",
            EventPayload::OptionExpired { .. } => "option_expired",
            EventPayload::OptionCancelled { .. } => "option_cancelled",
            EventPayload::OptionRefreshed { .. } => "option_refreshed",
        }
    }
}

// 4.0: perpetual positions on an outcome probability. OPEN -> CLOSED | LIQUIDATED, never re-opened.
// pnl = direction * size * (mark - entry) / entry, so size is hbar notional at entry.

use crate::account::{MarginError, MarginMode};
use crate::mark_price::OracleError;
use crate::market::MarketError;
use crate::types::{round_probability, AccountId, DerivativeId, Hbar, Leverage, MarketId, Outcome, ParseEnumError, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpetualPosition {
    pub id: DerivativeId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub side: Side,
    pub size_hbar: Hbar,
    pub leverage: Leverage,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub margin_hbar: Hbar,
    /// Account mode when the position was opened
    pub margin_mode: MarginMode,
    pub unrealized_pnl_hbar: Hbar,
    pub realized_pnl_hbar: Hbar,
    pub liquidation_price: Decimal,
    pub funding_accrued_hbar: Hbar,
    pub status: PositionStatus,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub exit_price: Option<Decimal>,
}

impl PerpetualPosition {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    // 4.1: refresh mark and pnl. liq price stays tied to entry
    pub fn mark_to(&mut self, mark: Decimal, now: Timestamp) {
        self.mark_price = round_probability(mark);
        self.unrealized_pnl_hbar = calculate_unrealized_pnl(self.side, self.size_hbar, self.entry_price, self.mark_price);
        self.liquidation_price = crate::liquidation::calculate_liquidation_price(self.entry_price, self.leverage, self.side);
        self.updated_at = now;
    }

    /// Position equity at the current mark: margin plus unrealized pnl.
    pub fn equity(&self) -> Hbar {
        self.margin_hbar.add(self.unrealized_pnl_hbar)
    }

    // LONG liquidates once mark falls to the liq price, SHORT once it rises to it.
    // an entry at the price clamp has its liq price pinned to entry and no room to lose.
    pub fn is_liquidatable(&self) -> bool {
        if self.liquidation_price == self.entry_price {
            return false;
        }
        match self.side {
            Side::Long => self.mark_price <= self.liquidation_price,
            Side::Short => self.mark_price >= self.liquidation_price,
        }
    }
}

// 4.2: the pnl formula. direction * size * (mark - entry) / entry
pub fn calculate_unrealized_pnl(side: Side, size: Hbar, entry_price: Decimal, mark_price: Decimal) -> Hbar {
    if entry_price.is_zero() {
        return Hbar::zero();
    }
    Hbar::rounded(side.sign() * size.value() * (mark_price - entry_price) / entry_price)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PerpError {
    #[error("Leverage must be within [1, 20], got {0}")]
    InvalidLeverage(Decimal),

    #[error("Position size must be positive, got {0}")]
    InvalidSize(Decimal),

    #[error("Close fraction must be within (0, 1], got {0}")]
    InvalidFraction(Decimal),

    #[error("Account id is empty")]
    EmptyAccountId,

    #[error("Position {0} not found")]
    NotFound(DerivativeId),

    #[error("Position {0} is not open")]
    NotOpen(DerivativeId),

    #[error("Position {position} belongs to {owner}, not {requested_by}")]
    NotOwner {
        position: DerivativeId,
        owner: AccountId,
        requested_by: AccountId,
    },

    #[error(transparent)]
    InvalidSide(#[from] ParseEnumError),

    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Margin(#[from] MarginError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn long_pnl_scales_with_relative_move() {
        // 0.40 -> 0.50 is a 25% move on 100 hbar
        let pnl = calculate_unrealized_pnl(Side::Long, Hbar::new(dec!(100)), dec!(0.40), dec!(0.50));
        assert_eq!(pnl.value(), dec!(25));
    }

    #[test]
    fn short_pnl_mirrors_long() {
        let long = calculate_unrealized_pnl(Side::Long, Hbar::new(dec!(100)), dec!(0.40), dec!(0.30));
        let short = calculate_unrealized_pnl(Side::Short, Hbar::new(dec!(100)), dec!(0.40), dec!(0.30));
        assert_eq!(long.value(), dec!(-25));
        assert_eq!(short.value(), dec!(25));
    }

    #[test]
    fn zero_entry_yields_zero_pnl() {
        let pnl = calculate_unrealized_pnl(Side::Long, Hbar::new(dec!(100)), Decimal::ZERO, dec!(0.5));
        assert!(pnl.is_zero());
    }
}

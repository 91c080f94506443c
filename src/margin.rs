//! Margin requirements for leveraged positions.
//!
//! Initial margin (IM) is locked when a position opens: size divided by leverage.
//! Maintenance margin (MM) is half of that. Effective equity adds unrealized pnl
//! of OPEN cross-margin positions to the account balance; isolated positions are
//! ring-fenced and do not count.

use crate::account::MarginMode;
use crate::position::{PerpetualPosition, PositionStatus};
use crate::types::{Hbar, Leverage};

pub fn compute_initial_margin(size: Hbar, leverage: Leverage) -> Hbar {
    Hbar::rounded(size.value() * leverage.initial_margin_fraction())
}

pub fn compute_maintenance_margin(size: Hbar, leverage: Leverage) -> Hbar {
    Hbar::rounded(size.value() * leverage.maintenance_fraction())
}

/// Balance plus unrealized pnl of the account's OPEN cross positions.
pub fn effective_equity<'a>(
    balance: Hbar,
    positions: impl IntoIterator<Item = &'a PerpetualPosition>,
) -> Hbar {
    positions
        .into_iter()
        .filter(|p| p.status == PositionStatus::Open && p.margin_mode == MarginMode::Cross)
        .fold(balance, |acc, p| acc.add(p.unrealized_pnl_hbar))
}

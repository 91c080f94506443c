//! Perpetual position lifecycle: open, refresh, partial and full close.

use super::core::Engine;
use super::results::{CloseResult, OpenInterest};
use crate::account::MarginError;
use crate::derivative::Derivative;
use crate::events::EventPayload;
use crate::liquidation::calculate_liquidation_price;
use crate::margin::compute_initial_margin;
use crate::position::{calculate_unrealized_pnl, PerpError, PerpetualPosition, PositionStatus};
use crate::types::{AccountId, DerivativeId, Hbar, Leverage, MarketId, Outcome, Side};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl Engine {
    /// Opens a position at the current oracle mark, locking `size / leverage` as margin.
    pub fn open_position(
        &mut self,
        account_id: &AccountId,
        market_id: &MarketId,
        outcome: &Outcome,
        side: Side,
        size: Hbar,
        leverage: Decimal,
    ) -> Result<PerpetualPosition, PerpError> {
        if account_id.is_empty() {
            return Err(PerpError::EmptyAccountId);
        }
        if !size.is_positive() {
            return Err(PerpError::InvalidSize(size.value()));
        }
        let leverage = Leverage::new(leverage).ok_or(PerpError::InvalidLeverage(leverage))?;

        let market = self.market(market_id)?;
        market.require_open()?;
        market.require_outcome(outcome)?;

        let margin = compute_initial_margin(size, leverage);
        if !margin.is_positive() {
            return Err(PerpError::InvalidSize(size.value()));
        }
        let account = self
            .ledger
            .get(account_id)
            .ok_or_else(|| MarginError::AccountNotFound(account_id.clone()))?;
        let available = account.available();
        if margin > available {
            return Err(MarginError::InsufficientMargin {
                account_id: account_id.clone(),
                requested: margin,
                available,
            }
            .into());
        }
        let mode = account.mode;

        let entry_price = self.compute_mark_price(market_id, outcome)?.mark_price;
        self.lock_margin(account_id, margin)?;

        let id = self.next_derivative_id();
        let now = self.current_time;
        let position = PerpetualPosition {
            id,
            account_id: account_id.clone(),
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            side,
            size_hbar: size,
            leverage,
            entry_price,
            mark_price: entry_price,
            margin_hbar: margin,
            margin_mode: mode,
            unrealized_pnl_hbar: Hbar::zero(),
            realized_pnl_hbar: Hbar::zero(),
            liquidation_price: calculate_liquidation_price(entry_price, leverage, side),
            funding_accrued_hbar: Hbar::zero(),
            status: PositionStatus::Open,
            opened_at: now,
            updated_at: now,
            closed_at: None,
            exit_price: None,
        };

        info!(
            position = %id,
            account = %account_id,
            market = %market_id,
            outcome = %outcome,
            ?side,
            size = %size.value(),
            leverage = %leverage,
            entry = %entry_price,
            liq = %position.liquidation_price,
            "position opened"
        );
        self.emit_event(EventPayload::PositionOpened {
            position: id,
            account_id: account_id.clone(),
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            side,
            size_hbar: size,
            leverage,
            entry_price,
            margin_hbar: margin,
            liquidation_price: position.liquidation_price,
        });
        self.derivatives.insert(id, Derivative::Perpetual(position.clone()));
        Ok(position)
    }

    /// Marks the position to a freshly computed oracle price. Never liquidates.
    pub fn refresh_position(&mut self, position_id: DerivativeId) -> Result<PerpetualPosition, PerpError> {
        let (market_id, outcome) = {
            let position = self.perpetual(position_id)?;
            if !position.is_open() {
                return Err(PerpError::NotOpen(position_id));
            }
            (position.market_id.clone(), position.outcome.clone())
        };
        let mark = self.fresh_mark(&market_id, &outcome)?;
        let now = self.current_time;

        let position = self.perpetual_mut(position_id)?;
        position.mark_to(mark, now);
        let refreshed = position.clone();

        debug!(
            position = %position_id,
            mark = %refreshed.mark_price,
            pnl = %refreshed.unrealized_pnl_hbar.value(),
            "position refreshed"
        );
        self.emit_event(EventPayload::PositionRefreshed {
            position: position_id,
            mark_price: refreshed.mark_price,
            unrealized_pnl_hbar: refreshed.unrealized_pnl_hbar,
        });
        Ok(refreshed)
    }

    /// Closes `fraction` of a position at the current mark.
    ///
    /// Releases the proportional margin and applies the proportional pnl to the balance.
    /// A loss larger than the balance floors it at zero; the truncated part is reported
    /// as `shortfall_hbar` and charged to the insurance fund.
    pub fn close_position(
        &mut self,
        account_id: &AccountId,
        position_id: DerivativeId,
        fraction: Decimal,
    ) -> Result<CloseResult, PerpError> {
        if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
            return Err(PerpError::InvalidFraction(fraction));
        }
        let snapshot = self.perpetual(position_id)?.clone();
        if &snapshot.account_id != account_id {
            return Err(PerpError::NotOwner {
                position: position_id,
                owner: snapshot.account_id.clone(),
                requested_by: account_id.clone(),
            });
        }
        if !snapshot.is_open() {
            return Err(PerpError::NotOpen(position_id));
        }
        if self.ledger.get(account_id).is_none() {
            return Err(MarginError::AccountNotFound(account_id.clone()).into());
        }

        let mark = self.fresh_mark(&snapshot.market_id, &snapshot.outcome)?;
        let full_close = fraction == Decimal::ONE;
        let total_pnl = calculate_unrealized_pnl(snapshot.side, snapshot.size_hbar, snapshot.entry_price, mark);
        let (realized, released) = if full_close {
            (total_pnl, snapshot.margin_hbar)
        } else {
            (total_pnl.mul(fraction), snapshot.margin_hbar.mul(fraction))
        };

        if released.is_positive() {
            self.release_margin(account_id, released)?;
        }
        let shortfall = self.ledger.apply_balance_delta(account_id, realized, self.current_time)?;
        if shortfall.is_positive() {
            let covered = self.insurance_fund.cover_bad_debt(shortfall);
            warn!(
                position = %position_id,
                account = %account_id,
                shortfall = %shortfall.value(),
                covered = %covered.value(),
                "close loss exceeded balance, truncated at zero"
            );
        }

        let now = self.current_time;
        let position = self.perpetual_mut(position_id)?;
        position.realized_pnl_hbar = position.realized_pnl_hbar.add(realized);
        if full_close {
            position.status = PositionStatus::Closed;
            position.mark_price = crate::types::round_probability(mark);
            position.unrealized_pnl_hbar = Hbar::zero();
            position.closed_at = Some(now);
            position.exit_price = Some(position.mark_price);
            position.updated_at = now;
        } else {
            position.size_hbar = position.size_hbar.sub(position.size_hbar.mul(fraction));
            position.margin_hbar = position.margin_hbar.sub(released);
            position.mark_to(mark, now);
        }
        let closed = position.clone();
        let exit_price = crate::types::round_probability(mark);

        info!(
            position = %position_id,
            account = %account_id,
            fraction = %fraction,
            exit = %exit_price,
            realized = %realized.value(),
            "position closed"
        );
        self.emit_event(EventPayload::PositionClosed {
            position: position_id,
            account_id: account_id.clone(),
            fraction,
            exit_price,
            realized_pnl_hbar: realized,
            released_margin_hbar: released,
            shortfall_hbar: shortfall,
            fully_closed: full_close,
        });

        Ok(CloseResult {
            position: closed,
            fraction,
            exit_price,
            realized_pnl_hbar: realized,
            released_margin_hbar: released,
            shortfall_hbar: shortfall,
        })
    }

    pub fn get_position(&self, position_id: DerivativeId) -> Option<&PerpetualPosition> {
        self.derivatives.get(&position_id).and_then(Derivative::as_perpetual)
    }

    pub fn get_positions(&self, account_id: &AccountId) -> Vec<&PerpetualPosition> {
        self.derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| &p.account_id == account_id)
            .collect()
    }

    /// Sums OPEN position sizes by side across every outcome of the market.
    pub fn get_open_interest(&self, market_id: &MarketId) -> OpenInterest {
        let mut long = Hbar::zero();
        let mut short = Hbar::zero();
        let mut open_positions = 0;
        for position in self
            .derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| p.is_open() && &p.market_id == market_id)
        {
            open_positions += 1;
            match position.side {
                Side::Long => long = long.add(position.size_hbar),
                Side::Short => short = short.add(position.size_hbar),
            }
        }
        OpenInterest {
            market_id: market_id.clone(),
            long_hbar: long,
            short_hbar: short,
            net_hbar: long.sub(short),
            open_positions,
        }
    }

    pub(super) fn perpetual(&self, position_id: DerivativeId) -> Result<&PerpetualPosition, PerpError> {
        self.derivatives
            .get(&position_id)
            .and_then(Derivative::as_perpetual)
            .ok_or(PerpError::NotFound(position_id))
    }

    pub(super) fn perpetual_mut(&mut self, position_id: DerivativeId) -> Result<&mut PerpetualPosition, PerpError> {
        self.derivatives
            .get_mut(&position_id)
            .and_then(Derivative::as_perpetual_mut)
            .ok_or(PerpError::NotFound(position_id))
    }

    fn fresh_mark(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<Decimal, PerpError> {
        Ok(self.compute_mark_price(market_id, outcome)?.mark_price)
    }
}

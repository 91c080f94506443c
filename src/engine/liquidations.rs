//! Liquidation sweep.

use super::core::Engine;
use super::results::LiquidationResult;
use crate::derivative::Derivative;
use crate::events::EventPayload;
use crate::liquidation::{LiquidationEvent, LiquidationTier};
use crate::mark_price::PriceKey;
use crate::position::{PerpError, PositionStatus};
use crate::types::{DerivativeId, Hbar, MarketId, Outcome};
use std::collections::BTreeSet;
use tracing::{debug, warn};

impl Engine {
    /// Marks every OPEN position on (market, outcome) and liquidates those whose mark
    /// has crossed their liquidation price.
    pub fn check_liquidations(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<LiquidationResult, PerpError> {
        let ids: Vec<DerivativeId> = self
            .derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| p.is_open() && &p.market_id == market_id && &p.outcome == outcome)
            .map(|p| p.id)
            .collect();

        let mut result = LiquidationResult {
            market_id: Some(market_id.clone()),
            outcome: Some(outcome.clone()),
            ..LiquidationResult::default()
        };
        if ids.is_empty() {
            return Ok(result);
        }

        let mark = self.compute_mark_price(market_id, outcome)?.mark_price;
        let now = self.current_time;
        for id in ids {
            result.checked += 1;
            let position = self.perpetual_mut(id)?;
            position.mark_to(mark, now);
            if !position.is_liquidatable() {
                continue;
            }
            let event = self.liquidate_position(id)?;
            result.liquidations.push(event);
        }

        debug!(
            market = %market_id,
            outcome = %outcome,
            checked = result.checked,
            liquidated = result.liquidations.len(),
            "liquidation sweep"
        );
        Ok(result)
    }

    /// Runs `check_liquidations` for every key with an OPEN position.
    pub fn check_all_liquidations(&mut self) -> Result<Vec<LiquidationResult>, PerpError> {
        let keys: BTreeSet<PriceKey> = self
            .derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| p.is_open())
            .map(|p| PriceKey::new(p.market_id.clone(), p.outcome.clone()))
            .collect();

        keys.into_iter()
            .map(|key| self.check_liquidations(&key.market_id, &key.outcome))
            .collect()
    }

    // the account forfeits the margin. residual equity goes to the fund, negative equity is bad debt
    fn liquidate_position(&mut self, position_id: DerivativeId) -> Result<LiquidationEvent, PerpError> {
        let position = self.perpetual(position_id)?.clone();
        let account_id = position.account_id.clone();
        let margin = position.margin_hbar;

        if margin.is_positive() {
            self.release_margin(&account_id, margin)?;
        }
        let uncollected = self
            .ledger
            .apply_balance_delta(&account_id, margin.negate(), self.current_time)?;
        let forfeited = margin.sub(uncollected);

        let equity = position.equity();
        let (tier, bad_debt, covered) = if equity.is_negative() {
            let bad_debt = equity.abs();
            let covered = self.insurance_fund.cover_bad_debt(bad_debt);
            (LiquidationTier::BadDebt, bad_debt, covered)
        } else {
            self.insurance_fund.contribute(equity);
            (LiquidationTier::Standard, Hbar::zero(), Hbar::zero())
        };

        let now = self.current_time;
        let stored = self.perpetual_mut(position_id)?;
        stored.status = PositionStatus::Liquidated;
        stored.realized_pnl_hbar = stored.realized_pnl_hbar.sub(forfeited);
        stored.unrealized_pnl_hbar = Hbar::zero();
        stored.closed_at = Some(now);
        stored.exit_price = Some(stored.mark_price);
        stored.updated_at = now;

        let event = LiquidationEvent {
            position: position_id,
            account_id: account_id.clone(),
            market_id: position.market_id.clone(),
            outcome: position.outcome.clone(),
            side: position.side,
            mark_price: position.mark_price,
            liquidation_price: position.liquidation_price,
            tier,
            forfeited_margin: forfeited,
            bad_debt,
            covered_by_insurance: covered,
            timestamp: now,
        };

        warn!(
            position = %position_id,
            account = %account_id,
            mark = %position.mark_price,
            liq = %position.liquidation_price,
            ?tier,
            forfeited = %forfeited.value(),
            bad_debt = %bad_debt.value(),
            "position liquidated"
        );
        self.liquidations.push(event.clone());
        self.emit_event(EventPayload::PositionLiquidated(event.clone()));
        Ok(event)
    }
}

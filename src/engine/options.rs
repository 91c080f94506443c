//! Option lifecycle: write, buy, exercise, expire, cancel, refresh.

use super::core::Engine;
use super::results::ExerciseResult;
use crate::account::MarginError;
use crate::derivative::Derivative;
use crate::events::EventPayload;
use crate::options::{
    payoff, theoretical_premium, validate_strike, OptionContract, OptionError, OptionStatus, OptionStyle,
    WriteOptionRequest,
};
use crate::types::{round_probability, AccountId, DerivativeId, Hbar, MarketId};
use tracing::{debug, info, warn};

impl Engine {
    /// Writes a new contract. The writer locks the full notional as collateral.
    pub fn write_option(&mut self, request: WriteOptionRequest) -> Result<OptionContract, OptionError> {
        let WriteOptionRequest {
            writer_account_id: writer,
            market_id,
            outcome,
            option_type,
            style,
            strike_price,
            size_hbar,
            premium_hbar,
            expiry,
            volatility,
        } = request;

        if writer.is_empty() {
            return Err(OptionError::EmptyAccountId);
        }
        if !size_hbar.is_positive() {
            return Err(OptionError::InvalidSize(size_hbar.value()));
        }
        if !premium_hbar.is_positive() {
            return Err(OptionError::InvalidPremium(premium_hbar.value()));
        }
        validate_strike(strike_price)?;
        let volatility = volatility.unwrap_or(self.config.options.default_volatility);
        if !volatility.is_finite() || volatility <= 0.0 {
            return Err(OptionError::InvalidVolatility(volatility));
        }
        let now = self.current_time;
        if expiry <= now {
            return Err(OptionError::InvalidExpiry { expiry, now });
        }

        let market = self.market(&market_id)?;
        market.require_open()?;
        market.require_outcome(&outcome)?;

        let available = self
            .ledger
            .get(&writer)
            .ok_or_else(|| MarginError::AccountNotFound(writer.clone()))?
            .available();
        if size_hbar > available {
            return Err(MarginError::InsufficientMargin {
                account_id: writer,
                requested: size_hbar,
                available,
            }
            .into());
        }

        let mark = self.compute_mark_price(&market_id, &outcome)?.mark_price;
        let id = self.next_derivative_id();
        let mut contract = OptionContract {
            id,
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            option_type,
            style,
            strike_price: round_probability(strike_price),
            premium_hbar,
            size_hbar,
            collateral_hbar: size_hbar,
            writer_account_id: writer.clone(),
            holder_account_id: None,
            expiry,
            status: OptionStatus::Active,
            volatility,
            theoretical_premium_hbar: Hbar::zero(),
            mark_price: mark,
            holder_pnl_hbar: Hbar::zero(),
            writer_pnl_hbar: Hbar::zero(),
            created_at: now,
            updated_at: now,
            purchased_at: None,
            settled_at: None,
            settlement_price: None,
            payoff_hbar: None,
        };
        let years = contract.time_to_expiry_years(now, self.config.options.days_per_year);
        contract.theoretical_premium_hbar =
            theoretical_premium(option_type, mark, contract.strike_price, size_hbar, volatility, years)?;

        self.lock_margin(&writer, size_hbar)?;

        info!(
            option = %id,
            writer = %writer,
            market = %market_id,
            outcome = %outcome,
            ?option_type,
            ?style,
            strike = %contract.strike_price,
            size = %size_hbar.value(),
            premium = %premium_hbar.value(),
            theoretical = %contract.theoretical_premium_hbar.value(),
            "option written"
        );
        self.emit_event(EventPayload::OptionWritten {
            option: id,
            writer,
            market_id,
            outcome,
            option_type,
            strike_price: contract.strike_price,
            size_hbar,
            premium_hbar,
            expiry,
        });
        self.derivatives.insert(id, Derivative::Option(contract.clone()));
        Ok(contract)
    }

    /// Buys an unsold contract, paying the premium from free margin to the writer.
    ///
    /// A contract found past expiry is marked EXPIRED (collateral back to the writer)
    /// before `OptionError::Expired` is returned.
    pub fn buy_option(&mut self, holder: &AccountId, option_id: DerivativeId) -> Result<OptionContract, OptionError> {
        if holder.is_empty() {
            return Err(OptionError::EmptyAccountId);
        }
        let contract = self.option(option_id)?.clone();
        if !contract.is_active() {
            return Err(OptionError::NotActive {
                id: option_id,
                status: contract.status,
            });
        }
        if contract.is_sold() {
            return Err(OptionError::AlreadySold(option_id));
        }
        if &contract.writer_account_id == holder {
            return Err(OptionError::SelfPurchase(option_id));
        }
        let now = self.current_time;
        if contract.is_expired_at(now) {
            self.expire_contract(option_id)?;
            return Err(OptionError::Expired(option_id));
        }

        let premium = contract.premium_hbar;
        let writer = contract.writer_account_id.clone();
        let available = self
            .ledger
            .get(holder)
            .ok_or_else(|| MarginError::AccountNotFound(holder.clone()))?
            .available();
        if premium > available {
            return Err(MarginError::InsufficientMargin {
                account_id: holder.clone(),
                requested: premium,
                available,
            }
            .into());
        }

        self.ledger.transfer(holder, &writer, premium, now)?;

        let contract = self.option_mut(option_id)?;
        contract.holder_account_id = Some(holder.clone());
        contract.purchased_at = Some(now);
        contract.updated_at = now;
        let bought = contract.clone();

        info!(option = %option_id, holder = %holder, writer = %writer, premium = %premium.value(), "option bought");
        self.emit_event(EventPayload::OptionBought {
            option: option_id,
            holder: holder.clone(),
            premium_hbar: premium,
        });
        Ok(bought)
    }

    /// Exercises at the current oracle mark. The writer's collateral is released;
    /// the payoff goes to the holder and the rest stays with the writer.
    pub fn exercise_option(&mut self, holder: &AccountId, option_id: DerivativeId) -> Result<ExerciseResult, OptionError> {
        let contract = self.option(option_id)?.clone();
        if !contract.is_active() {
            return Err(OptionError::NotActive {
                id: option_id,
                status: contract.status,
            });
        }
        let owner = contract.holder_account_id.as_ref().ok_or(OptionError::NotSold(option_id))?;
        if owner != holder {
            return Err(OptionError::NotHolder {
                id: option_id,
                requested_by: holder.clone(),
            });
        }
        let now = self.current_time;
        if contract.style == OptionStyle::European && !contract.is_expired_at(now) {
            return Err(OptionError::PrematureExercise {
                id: option_id,
                expiry: contract.expiry,
            });
        }
        let writer = contract.writer_account_id.clone();
        for account in [&writer, holder] {
            if self.ledger.get(account).is_none() {
                return Err(MarginError::AccountNotFound(account.clone()).into());
            }
        }

        let mark = self.compute_mark_price(&contract.market_id, &contract.outcome)?.mark_price;
        let owed = payoff(contract.option_type, mark, contract.strike_price, contract.size_hbar).min(contract.collateral_hbar);
        let returned = contract.collateral_hbar.sub(owed);

        self.release_margin(&writer, contract.collateral_hbar)?;
        let mut uncovered = Hbar::zero();
        if owed.is_positive() {
            let shortfall = self.ledger.apply_balance_delta(&writer, owed.negate(), now)?;
            if shortfall.is_positive() {
                let covered = self.insurance_fund.cover_bad_debt(shortfall);
                uncovered = shortfall.sub(covered);
                warn!(
                    option = %option_id,
                    writer = %writer,
                    shortfall = %shortfall.value(),
                    covered = %covered.value(),
                    "writer balance short of payoff"
                );
            }
        }
        // the holder only receives what was actually collected
        let paid = owed.sub(uncovered);
        if paid.is_positive() {
            self.ledger.apply_balance_delta(holder, paid, now)?;
        }

        let contract = self.option_mut(option_id)?;
        contract.status = OptionStatus::Exercised;
        contract.mark_price = mark;
        contract.settlement_price = Some(mark);
        contract.payoff_hbar = Some(owed);
        contract.settled_at = Some(now);
        contract.updated_at = now;
        contract.holder_pnl_hbar = paid.sub(contract.premium_hbar);
        contract.writer_pnl_hbar = contract.holder_pnl_hbar.negate();

        info!(
            option = %option_id,
            holder = %holder,
            settlement = %mark,
            payoff = %owed.value(),
            returned = %returned.value(),
            "option exercised"
        );
        self.emit_event(EventPayload::OptionExercised {
            option: option_id,
            holder: holder.clone(),
            settlement_price: mark,
            payoff_hbar: owed,
            returned_to_writer_hbar: returned,
            uncovered_hbar: uncovered,
        });

        Ok(ExerciseResult {
            option: option_id,
            settlement_price: mark,
            payoff_hbar: owed,
            returned_to_writer_hbar: returned,
            uncovered_hbar: uncovered,
        })
    }

    /// Sweeps every ACTIVE contract at or past expiry to EXPIRED.
    pub fn expire_options(&mut self) -> Result<Vec<DerivativeId>, OptionError> {
        let now = self.current_time;
        let due: Vec<DerivativeId> = self
            .derivatives
            .values()
            .filter_map(Derivative::as_option)
            .filter(|o| o.is_active() && o.is_expired_at(now))
            .map(|o| o.id)
            .collect();

        for id in &due {
            self.expire_contract(*id)?;
        }
        if !due.is_empty() {
            info!(expired = due.len(), "option expiry sweep");
        }
        Ok(due)
    }

    /// Writer withdraws an unsold ACTIVE contract and gets the collateral back.
    pub fn cancel_option(&mut self, writer: &AccountId, option_id: DerivativeId) -> Result<OptionContract, OptionError> {
        let contract = self.option(option_id)?;
        if &contract.writer_account_id != writer {
            return Err(OptionError::NotWriter {
                id: option_id,
                requested_by: writer.clone(),
            });
        }
        if !contract.is_active() {
            return Err(OptionError::NotActive {
                id: option_id,
                status: contract.status,
            });
        }
        if contract.is_sold() {
            return Err(OptionError::AlreadySold(option_id));
        }
        let collateral = contract.collateral_hbar;

        self.release_margin(writer, collateral)?;
        let now = self.current_time;
        let contract = self.option_mut(option_id)?;
        contract.status = OptionStatus::Cancelled;
        contract.settled_at = Some(now);
        contract.updated_at = now;
        let cancelled = contract.clone();

        info!(option = %option_id, writer = %writer, released = %collateral.value(), "option cancelled");
        self.emit_event(EventPayload::OptionCancelled {
            option: option_id,
            writer: writer.clone(),
            released_hbar: collateral,
        });
        Ok(cancelled)
    }

    /// Reprices at the current mark and remaining time. Holder and writer pnl are zero-sum.
    pub fn refresh_option(&mut self, option_id: DerivativeId) -> Result<OptionContract, OptionError> {
        let contract = self.option(option_id)?;
        if !contract.is_active() {
            return Err(OptionError::NotActive {
                id: option_id,
                status: contract.status,
            });
        }
        let (market_id, outcome) = (contract.market_id.clone(), contract.outcome.clone());

        let mark = self.compute_mark_price(&market_id, &outcome)?.mark_price;
        let now = self.current_time;
        let days_per_year = self.config.options.days_per_year;
        let contract = self.option_mut(option_id)?;
        let years = contract.time_to_expiry_years(now, days_per_year);
        let current = theoretical_premium(
            contract.option_type,
            mark,
            contract.strike_price,
            contract.size_hbar,
            contract.volatility,
            years,
        )?;
        contract.mark_price = mark;
        contract.theoretical_premium_hbar = current;
        if contract.is_sold() {
            contract.holder_pnl_hbar = current.sub(contract.premium_hbar);
            contract.writer_pnl_hbar = contract.holder_pnl_hbar.negate();
        }
        contract.updated_at = now;
        let refreshed = contract.clone();

        debug!(
            option = %option_id,
            mark = %mark,
            theoretical = %current.value(),
            holder_pnl = %refreshed.holder_pnl_hbar.value(),
            "option refreshed"
        );
        self.emit_event(EventPayload::OptionRefreshed {
            option: option_id,
            theoretical_premium_hbar: current,
            holder_pnl_hbar: refreshed.holder_pnl_hbar,
        });
        Ok(refreshed)
    }

    pub fn refresh_all_options(&mut self) -> Result<Vec<OptionContract>, OptionError> {
        let ids: Vec<DerivativeId> = self
            .derivatives
            .values()
            .filter_map(Derivative::as_option)
            .filter(|o| o.is_active())
            .map(|o| o.id)
            .collect();
        ids.into_iter().map(|id| self.refresh_option(id)).collect()
    }

    pub fn get_option(&self, option_id: DerivativeId) -> Option<&OptionContract> {
        self.derivatives.get(&option_id).and_then(Derivative::as_option)
    }

    /// Contracts the account wrote or holds.
    pub fn get_options(&self, account_id: &AccountId) -> Vec<&OptionContract> {
        self.derivatives
            .values()
            .filter_map(Derivative::as_option)
            .filter(|o| o.involves(account_id))
            .collect()
    }

    /// ACTIVE, unsold and unexpired contracts on the market.
    pub fn get_available_options(&self, market_id: &MarketId) -> Vec<&OptionContract> {
        let now = self.current_time;
        self.derivatives
            .values()
            .filter_map(Derivative::as_option)
            .filter(|o| &o.market_id == market_id && o.is_active() && !o.is_sold() && !o.is_expired_at(now))
            .collect()
    }

    fn option(&self, option_id: DerivativeId) -> Result<&OptionContract, OptionError> {
        self.derivatives
            .get(&option_id)
            .and_then(Derivative::as_option)
            .ok_or(OptionError::NotFound(option_id))
    }

    fn option_mut(&mut self, option_id: DerivativeId) -> Result<&mut OptionContract, OptionError> {
        self.derivatives
            .get_mut(&option_id)
            .and_then(Derivative::as_option_mut)
            .ok_or(OptionError::NotFound(option_id))
    }

    // unexercised holders forfeit only the premium already paid
    fn expire_contract(&mut self, option_id: DerivativeId) -> Result<Hbar, OptionError> {
        let contract = self.option(option_id)?;
        let writer = contract.writer_account_id.clone();
        let collateral = contract.collateral_hbar;

        self.release_margin(&writer, collateral)?;
        let now = self.current_time;
        let contract = self.option_mut(option_id)?;
        contract.status = OptionStatus::Expired;
        contract.settled_at = Some(now);
        contract.updated_at = now;
        if contract.is_sold() {
            contract.payoff_hbar = Some(Hbar::zero());
            contract.holder_pnl_hbar = contract.premium_hbar.negate();
            contract.writer_pnl_hbar = contract.premium_hbar;
        }

        info!(option = %option_id, writer = %writer, released = %collateral.value(), "option expired");
        self.emit_event(EventPayload::OptionExpired {
            option: option_id,
            writer,
            released_hbar: collateral,
        });
        Ok(collateral)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::market::Market;
    use crate::options::{OptionError, OptionStatus, OptionStyle, OptionType, WriteOptionRequest};
    use crate::types::{AccountId, Hbar, MarketId, Outcome, Timestamp, MS_PER_DAY};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const START: i64 = 1_700_000_000_000;

    fn setup() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp(START));
        let market = Market::clob(
            MarketId::new("m1"),
            vec![Outcome::new("YES"), Outcome::new("NO")],
            Timestamp(START + 30 * MS_PER_DAY),
        );
        engine.add_market(market).unwrap();
        engine.deposit_margin(&AccountId::new("writer"), Hbar::new(dec!(100))).unwrap();
        engine.deposit_margin(&AccountId::new("holder"), Hbar::new(dec!(10))).unwrap();
        engine
    }

    fn request(style: OptionStyle, days: i64) -> WriteOptionRequest {
        WriteOptionRequest {
            writer_account_id: AccountId::new("writer"),
            market_id: MarketId::new("m1"),
            outcome: Outcome::new("YES"),
            option_type: OptionType::Call,
            style,
            strike_price: dec!(0.5),
            size_hbar: Hbar::new(dec!(50)),
            premium_hbar: Hbar::new(dec!(2)),
            expiry: Timestamp(START + days * MS_PER_DAY),
            volatility: None,
        }
    }

    #[test]
    fn writing_locks_full_notional() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 7)).unwrap();
        assert_eq!(option.collateral_hbar, Hbar::new(dec!(50)));
        assert!(option.theoretical_premium_hbar.value() >= Decimal::ZERO);
        let writer = engine.get_margin_account(&AccountId::new("writer")).unwrap();
        assert_eq!(writer.locked_hbar, Hbar::new(dec!(50)));
        assert_eq!(engine.get_available_options(&MarketId::new("m1")).len(), 1);
    }

    #[test]
    fn writing_rejects_past_expiry_without_locking() {
        let mut engine = setup();
        let err = engine.write_option(request(OptionStyle::American, 0)).unwrap_err();
        assert!(matches!(err, OptionError::InvalidExpiry { .. }));
        assert!(engine.get_margin_account(&AccountId::new("writer")).unwrap().locked_hbar.is_zero());
    }

    #[test]
    fn self_purchase_rejected() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 7)).unwrap();
        let err = engine.buy_option(&AccountId::new("writer"), option.id).unwrap_err();
        assert!(matches!(err, OptionError::SelfPurchase(_)));
    }

    #[test]
    fn buying_an_expired_contract_marks_it_expired() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 1)).unwrap();
        engine.advance_time(2 * MS_PER_DAY);

        let err = engine.buy_option(&AccountId::new("holder"), option.id).unwrap_err();
        assert!(matches!(err, OptionError::Expired(_)));
        assert_eq!(engine.get_option(option.id).unwrap().status, OptionStatus::Expired);
        assert!(engine.get_margin_account(&AccountId::new("writer")).unwrap().locked_hbar.is_zero());
    }

    #[test]
    fn european_exercise_before_expiry_rejected() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::European, 7)).unwrap();
        engine.buy_option(&AccountId::new("holder"), option.id).unwrap();
        let err = engine.exercise_option(&AccountId::new("holder"), option.id).unwrap_err();
        assert!(matches!(err, OptionError::PrematureExercise { .. }));
    }

    #[test]
    fn expiry_sweep_returns_collateral() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 1)).unwrap();
        engine.buy_option(&AccountId::new("holder"), option.id).unwrap();
        engine.advance_time(MS_PER_DAY);

        let expired = engine.expire_options().unwrap();
        assert_eq!(expired, vec![option.id]);
        let writer = engine.get_margin_account(&AccountId::new("writer")).unwrap();
        assert!(writer.locked_hbar.is_zero());
        assert_eq!(writer.balance_hbar, Hbar::new(dec!(102)));
        let contract = engine.get_option(option.id).unwrap();
        assert_eq!(contract.holder_pnl_hbar, Hbar::new(dec!(-2)));
    }

    #[test]
    fn cancel_only_unsold_by_writer() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 7)).unwrap();
        assert!(matches!(
            engine.cancel_option(&AccountId::new("holder"), option.id),
            Err(OptionError::NotWriter { .. })
        ));
        let cancelled = engine.cancel_option(&AccountId::new("writer"), option.id).unwrap();
        assert_eq!(cancelled.status, OptionStatus::Cancelled);
        assert!(engine.get_available_options(&MarketId::new("m1")).is_empty());
    }

    #[test]
    fn refresh_keeps_pnl_zero_sum() {
        let mut engine = setup();
        let option = engine.write_option(request(OptionStyle::American, 7)).unwrap();
        engine.buy_option(&AccountId::new("holder"), option.id).unwrap();
        let refreshed = engine.refresh_option(option.id).unwrap();
        assert_eq!(refreshed.holder_pnl_hbar.add(refreshed.writer_pnl_hbar), Hbar::zero());
        assert_eq!(engine.get_options(&AccountId::new("holder")).len(), 1);
    }
}

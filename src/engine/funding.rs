//! Funding rate computation and settlement.

use super::core::Engine;
use super::results::FundingResult;
use crate::account::MarginError;
use crate::derivative::Derivative;
use crate::events::EventPayload;
use crate::funding::{compute_funding_rate, funding_amount, push_capped, FundingError, FundingPayment, FundingRate};
use crate::mark_price::PriceKey;
use crate::types::{round_rate, DerivativeId, Hbar, MarketId, Outcome, Side, Timestamp};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl Engine {
    /// Hourly rate from a fresh mark against the market index. Not recorded.
    pub fn compute_funding_rate(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<FundingRate, FundingError> {
        let snapshot = self.compute_mark_price(market_id, outcome)?;
        let rate = compute_funding_rate(snapshot.mark_price, snapshot.index_price, &self.config.funding);
        Ok(FundingRate {
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            rate,
            premium: round_rate(crate::funding::calculate_premium(snapshot.mark_price, snapshot.index_price)),
            mark_price: snapshot.mark_price,
            index_price: snapshot.index_price,
            timestamp: self.current_time,
        })
    }

    /// Settles one funding period for every OPEN position on (market, outcome).
    /// Positive rates move hbar from longs to shorts.
    pub fn settle_funding(&mut self, market_id: &MarketId, outcome: &Outcome) -> Result<FundingResult, FundingError> {
        let positions: Vec<(DerivativeId, crate::types::AccountId, Side, Hbar)> = self
            .derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| p.is_open() && &p.market_id == market_id && &p.outcome == outcome)
            .map(|p| (p.id, p.account_id.clone(), p.side, p.size_hbar))
            .collect();
        if let Some((_, missing, _, _)) = positions.iter().find(|(_, a, _, _)| self.ledger.get(a).is_none()) {
            return Err(MarginError::AccountNotFound(missing.clone()).into());
        }

        let rate = self.compute_funding_rate(market_id, outcome)?;
        let now = self.current_time;
        let mut payments = Vec::with_capacity(positions.len());
        let mut total_long = Hbar::zero();
        let mut total_short = Hbar::zero();

        for (id, account_id, side, size) in positions {
            let amount = funding_amount(side, size, rate.rate);
            let shortfall = self.ledger.apply_balance_delta(&account_id, amount, now)?;
            if shortfall.is_positive() {
                warn!(position = %id, account = %account_id, shortfall = %shortfall.value(), "funding debit truncated at zero");
            }
            if let Some(position) = self.derivatives.get_mut(&id).and_then(Derivative::as_perpetual_mut) {
                position.funding_accrued_hbar = position.funding_accrued_hbar.add(amount);
                position.updated_at = now;
            }
            match side {
                Side::Long => total_long = total_long.add(amount.negate()),
                Side::Short => total_short = total_short.add(amount.negate()),
            }
            payments.push(FundingPayment {
                position: id,
                account_id,
                market_id: market_id.clone(),
                outcome: outcome.clone(),
                side,
                size_hbar: size,
                rate: rate.rate,
                amount_hbar: amount,
                shortfall_hbar: shortfall,
                timestamp: now,
            });
        }

        let key = PriceKey::new(market_id.clone(), outcome.clone());
        let cap = self.config.funding.history_cap;
        push_capped(self.funding_rates.entry(key.clone()).or_default(), rate.clone(), cap);
        self.funding_payments
            .entry(key.clone())
            .or_default()
            .extend(payments.iter().cloned());
        self.last_funding_at.insert(key, now);

        info!(
            market = %market_id,
            outcome = %outcome,
            rate = %rate.rate,
            payments = payments.len(),
            paid_by_longs = %total_long.value(),
            paid_by_shorts = %total_short.value(),
            "funding settled"
        );
        self.emit_event(EventPayload::FundingSettled {
            market_id: market_id.clone(),
            outcome: outcome.clone(),
            rate: rate.rate,
            payments: payments.len(),
            paid_by_longs: total_long,
            paid_by_shorts: total_short,
        });

        Ok(FundingResult {
            rate,
            payments,
            total_long_payments: total_long,
            total_short_payments: total_short,
        })
    }

    /// Settles every key with OPEN positions whose last settlement (or earliest open)
    /// is at least one funding interval old.
    pub fn settle_due_funding(&mut self) -> Result<Vec<FundingResult>, FundingError> {
        let mut anchors: BTreeMap<PriceKey, Timestamp> = BTreeMap::new();
        for position in self
            .derivatives
            .values()
            .filter_map(Derivative::as_perpetual)
            .filter(|p| p.is_open())
        {
            let key = PriceKey::new(position.market_id.clone(), position.outcome.clone());
            let anchor = anchors.entry(key).or_insert(position.opened_at);
            if position.opened_at < *anchor {
                *anchor = position.opened_at;
            }
        }

        let interval = self.config.funding.interval_ms;
        let now = self.current_time;
        let due: Vec<PriceKey> = anchors
            .into_iter()
            .filter(|(key, opened)| {
                let last = self.last_funding_at.get(key).copied().unwrap_or(*opened);
                last.millis_until(&now) >= interval
            })
            .map(|(key, _)| key)
            .collect();

        debug!(due = due.len(), "funding sweep");
        due.iter()
            .map(|key| self.settle_funding(&key.market_id, &key.outcome))
            .collect()
    }

    pub fn get_funding_history(&self, market_id: &MarketId, outcome: &Outcome) -> Vec<FundingRate> {
        self.funding_rates
            .get(&PriceKey::new(market_id.clone(), outcome.clone()))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_funding_payments(&self, market_id: &MarketId, outcome: &Outcome) -> &[FundingPayment] {
        self.funding_payments
            .get(&PriceKey::new(market_id.clone(), outcome.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

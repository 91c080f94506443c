// 8.0 engine/core.rs: main engine. owns markets, the margin ledger, the oracle, the quote
// book, every derivative, funding history, the insurance fund and the audit outbox.

use crate::account::MarginLedger;
use crate::audit::{AuditOutbox, DrainReport, LedgerSink};
use crate::config::{ConfigError, EngineConfig};
use crate::derivative::Derivative;
use crate::events::{Event, EventId, EventPayload};
use crate::funding::{FundingPayment, FundingRate};
use crate::liquidation::{InsuranceFund, LiquidationEvent};
use crate::mark_price::{PriceKey, PriceOracle};
use crate::market::{normalize_to_percentages, LiquidityModel, Market, MarketError, MarketStatus};
use crate::order::OrderBook;
use crate::types::{DerivativeId, MarketId, Outcome, Timestamp};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, warn};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) markets: BTreeMap<MarketId, Market>,
    pub(super) ledger: MarginLedger,
    pub(super) oracle: PriceOracle,
    pub(super) order_book: OrderBook,
    pub(super) derivatives: BTreeMap<DerivativeId, Derivative>,
    pub(super) funding_rates: BTreeMap<PriceKey, VecDeque<FundingRate>>,
    pub(super) funding_payments: BTreeMap<PriceKey, Vec<FundingPayment>>,
    pub(super) last_funding_at: BTreeMap<PriceKey, Timestamp>,
    pub(super) liquidations: Vec<LiquidationEvent>,
    pub(super) insurance_fund: InsuranceFund,
    pub(super) events: VecDeque<Event>,
    pub(super) outbox: AuditOutbox,
    pub(super) next_event_id: u64,
    pub(super) next_derivative_id: u64,
    pub(super) current_time: Timestamp,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            oracle: PriceOracle::new(config.oracle.clone()),
            insurance_fund: InsuranceFund::new(config.liquidation.insurance_fund_seed),
            config,
            markets: BTreeMap::new(),
            ledger: MarginLedger::new(),
            order_book: OrderBook::new(),
            derivatives: BTreeMap::new(),
            funding_rates: BTreeMap::new(),
            funding_payments: BTreeMap::new(),
            last_funding_at: BTreeMap::new(),
            liquidations: Vec::new(),
            events: VecDeque::new(),
            outbox: AuditOutbox::new(),
            next_event_id: 1,
            next_derivative_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    /// Validates the config before building the engine.
    pub fn from_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    /// Moves the clock to wall time. Never moves it backwards.
    pub fn sync_clock(&mut self) -> Timestamp {
        let now = Timestamp::now();
        if now > self.current_time {
            self.current_time = now;
        }
        self.current_time
    }

    pub fn add_market(&mut self, mut market: Market) -> Result<MarketId, MarketError> {
        market.validate()?;
        if self.markets.contains_key(&market.id) {
            return Err(MarketError::AlreadyExists(market.id));
        }
        market.created_at = self.current_time;
        let market_id = market.id.clone();
        let curve = matches!(market.liquidity, LiquidityModel::Curve { .. });

        info!(market = %market_id, outcomes = market.outcomes.len(), curve, "market added");
        self.emit_event(EventPayload::MarketAdded {
            market_id: market_id.clone(),
            outcomes: market.outcomes.clone(),
            curve,
        });
        self.markets.insert(market_id.clone(), market);
        Ok(market_id)
    }

    pub fn get_market(&self, market_id: &MarketId) -> Option<&Market> {
        self.markets.get(market_id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }

    pub(super) fn market(&self, market_id: &MarketId) -> Result<&Market, MarketError> {
        self.markets
            .get(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))
    }

    pub fn set_market_status(&mut self, market_id: &MarketId, status: MarketStatus) -> Result<(), MarketError> {
        let market = self
            .markets
            .get_mut(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))?;
        market.status = status;

        info!(market = %market_id, ?status, "market status changed");
        self.emit_event(EventPayload::MarketStatusChanged {
            market_id: market_id.clone(),
            status,
        });
        Ok(())
    }

    /// Odds written back by the external catalog. Every outcome needs a non-negative
    /// weight; the result is renormalized to sum to exactly 100.
    pub fn set_market_odds(
        &mut self,
        market_id: &MarketId,
        odds: &BTreeMap<Outcome, Decimal>,
    ) -> Result<BTreeMap<Outcome, Decimal>, MarketError> {
        let market = self
            .markets
            .get_mut(market_id)
            .ok_or_else(|| MarketError::NotFound(market_id.clone()))?;
        let mut weights = Vec::with_capacity(market.outcomes.len());
        for outcome in &market.outcomes {
            match odds.get(outcome) {
                Some(w) if *w >= Decimal::ZERO => weights.push(*w),
                _ => {
                    return Err(MarketError::InvalidOutcomes {
                        market_id: market_id.clone(),
                        reason: format!("missing or negative odds for {outcome}"),
                    })
                }
            }
        }
        if let Some(extra) = odds.keys().find(|o| !market.has_outcome(o)) {
            return Err(MarketError::UnknownOutcome {
                market_id: market_id.clone(),
                outcome: extra.clone(),
            });
        }

        let normalized = normalize_to_percentages(&market.outcomes, &weights);
        market.current_odds = normalized.clone();
        // curve shares no longer match the odds; rederive on the next trade
        if market.curve_state.is_some() {
            market.curve_state = None;
        }

        info!(market = %market_id, "market odds updated");
        self.emit_event(EventPayload::OddsUpdated {
            market_id: market_id.clone(),
            odds: normalized.clone(),
        });
        Ok(normalized)
    }

    pub fn derivatives(&self) -> impl Iterator<Item = &Derivative> {
        self.derivatives.values()
    }

    pub fn get_derivative(&self, id: DerivativeId) -> Option<&Derivative> {
        self.derivatives.get(&id)
    }

    pub(super) fn next_derivative_id(&mut self) -> DerivativeId {
        let id = DerivativeId(self.next_derivative_id);
        self.next_derivative_id += 1;
        id
    }

    pub fn insurance_fund(&self) -> &InsuranceFund {
        &self.insurance_fund
    }

    pub fn liquidations(&self) -> &[LiquidationEvent] {
        &self.liquidations
    }

    pub fn recent_events(&self, count: usize) -> Vec<&Event> {
        let start = self.events.len().saturating_sub(count);
        self.events.range(start..).collect()
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn outbox(&self) -> &AuditOutbox {
        &self.outbox
    }

    /// Delivers pending audit messages. Core state is never touched by the outcome.
    pub fn drain_audit(&mut self, sink: &mut dyn LedgerSink) -> DrainReport {
        let topic = self.config.audit.topic_id.clone();
        self.outbox.drain(sink, &topic, self.config.audit.max_attempts)
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if let Err(err) = self.outbox.enqueue(&event) {
            warn!(event_id = event.id.0, error = %err, "audit enqueue failed");
        }

        self.events.push_back(event);
        while self.events.len() > self.config.max_events {
            self.events.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryLedger;
    use crate::types::Hbar;
    use rust_decimal_macros::dec;

    fn yes_no() -> Vec<Outcome> {
        vec![Outcome::new("YES"), Outcome::new("NO")]
    }

    #[test]
    fn duplicate_market_rejected() {
        let mut engine = Engine::new(EngineConfig::default());
        let market = Market::clob(MarketId::new("m1"), yes_no(), Timestamp(1_000));
        engine.add_market(market.clone()).unwrap();
        assert!(matches!(engine.add_market(market), Err(MarketError::AlreadyExists(_))));
    }

    #[test]
    fn underfunded_curve_rejected() {
        let mut engine = Engine::new(EngineConfig::default());
        let market = Market::curve(MarketId::new("m1"), yes_no(), Timestamp(1_000), 25.0, Hbar::new(dec!(1)));
        assert!(engine.add_market(market).is_err());
        assert!(engine.get_market(&MarketId::new("m1")).is_none());
    }

    #[test]
    fn event_log_is_bounded() {
        let mut config = EngineConfig::default();
        config.max_events = 2;
        let mut engine = Engine::new(config);
        for i in 0..4 {
            let market = Market::clob(MarketId::new(format!("m{i}")), yes_no(), Timestamp(1_000));
            engine.add_market(market).unwrap();
        }
        assert_eq!(engine.events().count(), 2);
        // the outbox is not trimmed with the log
        assert_eq!(engine.outbox().len(), 4);
    }

    #[test]
    fn drain_delivers_to_configured_topic() {
        let mut config = EngineConfig::default();
        config.audit.topic_id = "0.0.9".to_string();
        let mut engine = Engine::new(config);
        engine
            .add_market(Market::clob(MarketId::new("m1"), yes_no(), Timestamp(1_000)))
            .unwrap();

        let mut ledger = MemoryLedger::new();
        let report = engine.drain_audit(&mut ledger);
        assert_eq!(report.delivered, 1);
        assert_eq!(ledger.messages[0].0, "0.0.9");
        assert!(engine.outbox().is_empty());
    }

    #[test]
    fn clock_controls() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp(5_000));
        engine.advance_time(1_000);
        assert_eq!(engine.time(), Timestamp(6_000));
        assert!(engine.sync_clock() >= Timestamp(6_000));
    }
}

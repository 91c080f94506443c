// 8.9 engine/snapshot.rs: explicit save/load boundary. the engine never touches disk on its own;
// callers take a snapshot and write it, or load one and restore from it.

use super::core::Engine;
use crate::account::{MarginAccount, MarginLedger};
use crate::audit::AuditOutbox;
use crate::config::{ConfigError, EngineConfig};
use crate::derivative::Derivative;
use crate::funding::{FundingPayment, FundingRate};
use crate::liquidation::{InsuranceFund, LiquidationEvent};
use crate::mark_price::{PriceKey, PriceOracle, PriceSnapshot};
use crate::market::Market;
use crate::order::OrderBook;
use crate::types::{map_entries, AccountId, DerivativeId, MarketId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::info;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Every map the engine owns. The event log is not carried; undelivered audit
/// messages travel in `outbox`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub taken_at: Timestamp,
    pub clock: Timestamp,
    pub markets: BTreeMap<MarketId, Market>,
    pub margin_accounts: BTreeMap<AccountId, MarginAccount>,
    #[serde(with = "map_entries")]
    pub derivatives: BTreeMap<DerivativeId, Derivative>,
    #[serde(with = "map_entries")]
    pub price_snapshots: BTreeMap<PriceKey, PriceSnapshot>,
    #[serde(with = "map_entries")]
    pub funding_rates: BTreeMap<PriceKey, VecDeque<FundingRate>>,
    #[serde(with = "map_entries")]
    pub funding_payments: BTreeMap<PriceKey, Vec<FundingPayment>>,
    #[serde(with = "map_entries")]
    pub last_funding_at: BTreeMap<PriceKey, Timestamp>,
    pub order_book: OrderBook,
    pub liquidations: Vec<LiquidationEvent>,
    pub insurance_fund: InsuranceFund,
    pub outbox: AuditOutbox,
    pub next_event_id: u64,
    pub next_derivative_id: u64,
}

impl Engine {
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: Timestamp::now(),
            clock: self.current_time,
            markets: self.markets.clone(),
            margin_accounts: self.ledger.accounts().clone(),
            derivatives: self.derivatives.clone(),
            price_snapshots: self.oracle.snapshots().clone(),
            funding_rates: self.funding_rates.clone(),
            funding_payments: self.funding_payments.clone(),
            last_funding_at: self.last_funding_at.clone(),
            order_book: self.order_book.clone(),
            liquidations: self.liquidations.clone(),
            insurance_fund: self.insurance_fund.clone(),
            outbox: self.outbox.clone(),
            next_event_id: self.next_event_id,
            next_derivative_id: self.next_derivative_id,
        }
    }

    /// Rebuilds an engine from a snapshot. Funding history is trimmed to the
    /// configured cap, oldest entries first.
    pub fn restore(config: EngineConfig, snapshot: EngineSnapshot) -> Result<Self, PersistenceError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        config.validate()?;

        let cap = config.funding.history_cap;
        let mut funding_rates = snapshot.funding_rates;
        for history in funding_rates.values_mut() {
            while history.len() > cap {
                history.pop_front();
            }
        }

        let mut oracle = PriceOracle::new(config.oracle.clone());
        oracle.restore(snapshot.price_snapshots);

        let mut engine = Engine::new(config);
        engine.current_time = snapshot.clock;
        engine.markets = snapshot.markets;
        engine.ledger = MarginLedger::from_accounts(snapshot.margin_accounts);
        engine.oracle = oracle;
        engine.order_book = snapshot.order_book;
        engine.derivatives = snapshot.derivatives;
        engine.funding_rates = funding_rates;
        engine.funding_payments = snapshot.funding_payments;
        engine.last_funding_at = snapshot.last_funding_at;
        engine.liquidations = snapshot.liquidations;
        engine.insurance_fund = snapshot.insurance_fund;
        engine.outbox = snapshot.outbox;
        engine.next_event_id = snapshot.next_event_id;
        engine.next_derivative_id = snapshot.next_derivative_id;

        info!(
            markets = engine.markets.len(),
            derivatives = engine.derivatives.len(),
            accounts = engine.ledger.accounts().len(),
            "engine restored"
        );
        Ok(engine)
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!(path = %path.display(), "engine snapshot saved");
        Ok(())
    }

    pub fn load_from_path(config: EngineConfig, path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let snapshot: EngineSnapshot =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        Self::restore(config, snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersistenceError {
    #[error("Snapshot I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Snapshot encoding failed: {0}")]
    Serialization(String),

    #[error("Unsupported snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hbar, Outcome};
    use rust_decimal_macros::dec;

    fn engine_with_state() -> Engine {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp(1_700_000_000_000));
        let market = Market::clob(
            MarketId::new("m1"),
            vec![Outcome::new("YES"), Outcome::new("NO")],
            Timestamp(1_800_000_000_000),
        );
        engine.add_market(market).unwrap();
        engine.deposit_margin(&AccountId::new("a"), Hbar::new(dec!(25))).unwrap();
        engine.compute_mark_price(&MarketId::new("m1"), &Outcome::new("YES")).unwrap();
        engine
    }

    #[test]
    fn snapshot_survives_json() {
        let engine = engine_with_state();
        let json = serde_json::to_string(&engine.snapshot()).unwrap();
        let parsed: EngineSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Engine::restore(EngineConfig::default(), parsed).unwrap();

        assert_eq!(restored.time(), engine.time());
        assert_eq!(
            restored.get_margin_account(&AccountId::new("a")).unwrap().balance_hbar,
            Hbar::new(dec!(25))
        );
        assert_eq!(
            restored.price_snapshot(&MarketId::new("m1"), &Outcome::new("YES")),
            engine.price_snapshot(&MarketId::new("m1"), &Outcome::new("YES"))
        );
        assert_eq!(restored.outbox().len(), engine.outbox().len());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut snapshot = engine_with_state().snapshot();
        snapshot.version = 99;
        assert!(matches!(
            Engine::restore(EngineConfig::default(), snapshot),
            Err(PersistenceError::UnsupportedVersion { found: 99, .. })
        ));
    }
}

// 8.0.2: result types for engine operations, and the umbrella error for callers that
// drive several subsystems at once.

use crate::account::MarginError;
use crate::amm::{CurveError, CurveQuote};
use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::funding::{FundingError, FundingPayment, FundingRate};
use crate::liquidation::LiquidationEvent;
use crate::mark_price::OracleError;
use crate::market::MarketError;
use crate::options::OptionError;
use crate::order::OrderError;
use crate::position::{PerpError, PerpetualPosition};
use crate::types::{DerivativeId, Hbar, MarketId, Outcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::snapshot::PersistenceError;

#[derive(Debug, Clone, PartialEq)]
pub struct CurveTradeResult {
    pub quote: CurveQuote,
    pub mark_price: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloseResult {
    pub position: PerpetualPosition,
    pub fraction: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl_hbar: Hbar,
    pub released_margin_hbar: Hbar,
    /// Loss the balance could not absorb; charged to the insurance fund
    pub shortfall_hbar: Hbar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub market_id: MarketId,
    pub long_hbar: Hbar,
    pub short_hbar: Hbar,
    pub net_hbar: Hbar,
    pub open_positions: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundingResult {
    pub rate: FundingRate,
    pub payments: Vec<FundingPayment>,
    pub total_long_payments: Hbar,
    pub total_short_payments: Hbar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseResult {
    pub option: DerivativeId,
    pub settlement_price: Decimal,
    pub payoff_hbar: Hbar,
    pub returned_to_writer_hbar: Hbar,
    /// Part of the payoff neither the writer nor the insurance fund could pay
    pub uncovered_hbar: Hbar,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiquidationResult {
    pub market_id: Option<MarketId>,
    pub outcome: Option<Outcome>,
    pub checked: usize,
    pub liquidations: Vec<LiquidationEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Market(#[from] MarketError),

    #[error(transparent)]
    Margin(#[from] MarginError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Perp(#[from] PerpError),

    #[error(transparent)]
    Funding(#[from] FundingError),

    #[error(transparent)]
    Option(#[from] OptionError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

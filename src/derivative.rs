// 6.0: perpetuals and options live in one id space and one map.
// each variant owns its own fields instead of one record full of optional ones.

use crate::options::OptionContract;
use crate::position::PerpetualPosition;
use crate::types::{AccountId, DerivativeId, MarketId, Outcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivative {
    Perpetual(PerpetualPosition),
    Option(OptionContract),
}

impl Derivative {
    pub fn id(&self) -> DerivativeId {
        match self {
            Derivative::Perpetual(p) => p.id,
            Derivative::Option(o) => o.id,
        }
    }

    pub fn market_id(&self) -> &MarketId {
        match self {
            Derivative::Perpetual(p) => &p.market_id,
            Derivative::Option(o) => &o.market_id,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        match self {
            Derivative::Perpetual(p) => &p.outcome,
            Derivative::Option(o) => &o.outcome,
        }
    }

    /// Position owner, or option writer.
    pub fn owner(&self) -> &AccountId {
        match self {
            Derivative::Perpetual(p) => &p.account_id,
            Derivative::Option(o) => &o.writer_account_id,
        }
    }

    pub fn as_perpetual(&self) -> Option<&PerpetualPosition> {
        match self {
            Derivative::Perpetual(p) => Some(p),
            Derivative::Option(_) => None,
        }
    }

    pub fn as_perpetual_mut(&mut self) -> Option<&mut PerpetualPosition> {
        match self {
            Derivative::Perpetual(p) => Some(p),
            Derivative::Option(_) => None,
        }
    }

    pub fn as_option(&self) -> Option<&OptionContract> {
        match self {
            Derivative::Option(o) => Some(o),
            Derivative::Perpetual(_) => None,
        }
    }

    pub fn as_option_mut(&mut self) -> Option<&mut OptionContract> {
        match self {
            Derivative::Option(o) => Some(o),
            Derivative::Perpetual(_) => None,
        }
    }
}

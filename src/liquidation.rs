//! Liquidation prices and the insurance fund.
//!
//! The liquidation price is a closed form fixed at open:
//! `maintenance = 1/(2L)`; LONG `entry * (1 - 1/L + maintenance)` floored at 0.001,
//! SHORT `entry * (1 + 1/L - maintenance)` capped at 0.999.
//!
//! When a position is liquidated the account forfeits its margin. Positive residual
//! equity flows into the insurance fund; negative residual equity is bad debt the
//! fund covers up to its balance.

use crate::mark_price::{PRICE_CEILING, PRICE_FLOOR};
use crate::types::{round_probability, AccountId, DerivativeId, Hbar, Leverage, MarketId, Outcome, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub fn calculate_liquidation_price(entry_price: Decimal, leverage: Leverage, side: Side) -> Decimal {
    let imf = leverage.initial_margin_fraction();
    let mmf = leverage.maintenance_fraction();

    let liq_price = match side {
        Side::Long => (entry_price * (Decimal::ONE - imf + mmf)).max(PRICE_FLOOR),
        Side::Short => (entry_price * (Decimal::ONE + imf - mmf)).min(PRICE_CEILING),
    };
    round_probability(liq_price)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiquidationTier {
    /// Residual equity was non-negative
    Standard,
    /// Losses exceeded the margin
    BadDebt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub position: DerivativeId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub side: Side,
    pub mark_price: Decimal,
    pub liquidation_price: Decimal,
    pub tier: LiquidationTier,
    pub forfeited_margin: Hbar,
    pub bad_debt: Hbar,
    pub covered_by_insurance: Hbar,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: Hbar,
    pub total_contributions: Hbar,
    pub total_bad_debt_covered: Hbar,
    /// Bad debt the fund could not absorb
    pub uncovered_bad_debt: Hbar,
}

impl InsuranceFund {
    pub fn new(initial_balance: Hbar) -> Self {
        Self {
            balance: initial_balance.floor_zero(),
            ..Self::default()
        }
    }

    pub fn contribute(&mut self, amount: Hbar) {
        if amount.is_positive() {
            self.balance = self.balance.add(amount);
            self.total_contributions = self.total_contributions.add(amount);
        }
    }

    /// Covers as much of `bad_debt` as the balance allows. Returns the covered part.
    pub fn cover_bad_debt(&mut self, bad_debt: Hbar) -> Hbar {
        if !bad_debt.is_positive() {
            return Hbar::zero();
        }
        let covered = bad_debt.min(self.balance);
        self.balance = self.balance.sub(covered);
        self.total_bad_debt_covered = self.total_bad_debt_covered.add(covered);
        self.uncovered_bad_debt = self.uncovered_bad_debt.add(bad_debt.sub(covered));
        covered
    }

    pub fn is_depleted(&self) -> bool {
        self.balance.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn lev(v: Decimal) -> Leverage {
        Leverage::new(v).unwrap()
    }

    #[test]
    fn long_five_x_at_forty_cents() {
        // 0.40 * (1 - 0.2 + 0.1)
        assert_eq!(calculate_liquidation_price(dec!(0.40), lev(dec!(5)), Side::Long), dec!(0.36));
    }

    #[test]
    fn short_mirror() {
        // 0.40 * (1 + 0.2 - 0.1)
        assert_eq!(calculate_liquidation_price(dec!(0.40), lev(dec!(5)), Side::Short), dec!(0.44));
    }

    #[test]
    fn one_x_long_clamps_to_floor_region() {
        // 1 - 1 + 0.5 = 0.5x entry
        assert_eq!(calculate_liquidation_price(dec!(0.5), lev(dec!(1)), Side::Long), dec!(0.25));
        assert_eq!(calculate_liquidation_price(dec!(0.001), lev(dec!(1)), Side::Long), dec!(0.001));
    }

    #[test]
    fn short_capped_at_ceiling() {
        assert_eq!(calculate_liquidation_price(dec!(0.99), lev(dec!(1)), Side::Short), dec!(0.999));
    }

    #[test]
    fn insurance_fund_partial_cover() {
        let mut fund = InsuranceFund::new(Hbar::new(dec!(5)));
        let covered = fund.cover_bad_debt(Hbar::new(dec!(8)));
        assert_eq!(covered.value(), dec!(5));
        assert!(fund.is_depleted());
        assert_eq!(fund.uncovered_bad_debt.value(), dec!(3));

        fund.contribute(Hbar::new(dec!(2)));
        assert_eq!(fund.balance.value(), dec!(2));
        assert_eq!(fund.total_contributions.value(), dec!(2));
    }
}

//! Property-based tests for the pricing and margin math.
//!
//! These tests verify invariants hold under random inputs.

use outcome_perps::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn probability_strategy() -> impl Strategy<Value = Decimal> {
    (10i64..990i64).prop_map(|x| Decimal::new(x, 3)) // 0.010 to 0.989
}

fn any_price_strategy() -> impl Strategy<Value = Decimal> {
    (-2_000i64..3_000i64).prop_map(|x| Decimal::new(x, 3)) // well outside [0, 1]
}

fn leverage_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..=20u32).prop_map(Decimal::from)
}

fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (100i64..5_000i64).prop_map(|x| Decimal::new(x, 2)) // 1.00 to 49.99 HBAR
}

fn three_way_market() -> Market {
    let outcomes = vec![Outcome::new("A"), Outcome::new("B"), Outcome::new("C")];
    let mut market = Market::curve(
        MarketId::new("p1"),
        outcomes,
        Timestamp(1_800_000_000_000),
        25.0,
        required_curve_funding(25.0, 3),
    );
    market.current_odds = market.uniform_odds();
    market
}

proptest! {
    /// Curve odds always sum to exactly 100, whatever the trade sequence
    #[test]
    fn curve_odds_sum_to_100(
        trades in proptest::collection::vec((0usize..3, amount_strategy()), 1..25),
    ) {
        let mut engine = Engine::new(EngineConfig::default());
        engine.set_time(Timestamp(1_700_000_000_000));
        let market = three_way_market();
        let outcomes = market.outcomes.clone();
        engine.add_market(market).unwrap();

        for (i, amount) in trades {
            let result = engine
                .execute_curve_trade(&AccountId::new("t"), &MarketId::new("p1"), &outcomes[i], amount)
                .unwrap();
            let total: Decimal = result.quote.odds_after.values().copied().sum();
            prop_assert_eq!(total, dec!(100));
            engine.advance_time(1_000);
        }
    }

    /// Buying X raises X's probability and lowers every other outcome's
    #[test]
    fn buying_moves_only_the_bought_outcome_up(
        pick in 0usize..3,
        amount in amount_strategy(),
    ) {
        let market = three_way_market();
        let outcome = market.outcomes[pick].clone();
        let before = ensure_curve_state(&market).unwrap().probabilities();
        let quote = quote_trade(&market, &outcome, amount).unwrap();
        let after = quote.state_after.probabilities();

        prop_assert!(quote.shares > 0.0);
        for o in &market.outcomes {
            if o == &outcome {
                prop_assert!(after[o] > before[o]);
            } else {
                prop_assert!(after[o] < before[o]);
            }
        }
    }

    /// Mark price stays inside [0.001, 0.999] for any inputs
    #[test]
    fn mark_is_always_clamped(
        index in any_price_strategy(),
        last in any_price_strategy(),
        ema in any_price_strategy(),
    ) {
        let mark = compute_mark(index, last, ema, &OracleParams::default());
        prop_assert!(mark >= PRICE_FLOOR);
        prop_assert!(mark <= PRICE_CEILING);
    }

    /// Median of three is one of its inputs and sits between the others
    #[test]
    fn median_is_an_input(
        a in any_price_strategy(),
        b in any_price_strategy(),
        c in any_price_strategy(),
    ) {
        let m = median3(a, b, c);
        prop_assert!(m == a || m == b || m == c);
        let below = [a, b, c].iter().filter(|x| **x <= m).count();
        let above = [a, b, c].iter().filter(|x| **x >= m).count();
        prop_assert!(below >= 2 && above >= 2);
    }

    /// LONG liquidates below entry, SHORT above, for every allowed leverage
    #[test]
    fn liquidation_price_brackets_entry(
        entry in probability_strategy(),
        leverage in leverage_strategy(),
    ) {
        let leverage = Leverage::new(leverage).unwrap();
        prop_assert!(calculate_liquidation_price(entry, leverage, Side::Long) < entry);
        prop_assert!(calculate_liquidation_price(entry, leverage, Side::Short) > entry);
    }

    /// Unrealized PnL is zero when mark = entry and antisymmetric across sides
    #[test]
    fn pnl_antisymmetric(
        entry in probability_strategy(),
        mark in probability_strategy(),
        size in amount_strategy(),
    ) {
        let size = Hbar::new(size);
        prop_assert!(calculate_unrealized_pnl(Side::Long, size, entry, entry).is_zero());
        let long = calculate_unrealized_pnl(Side::Long, size, entry, mark);
        let short = calculate_unrealized_pnl(Side::Short, size, entry, mark);
        prop_assert_eq!(long.add(short), Hbar::zero());
    }

    /// Lock fails exactly when amount > balance - locked; locked never exceeds balance
    #[test]
    fn lock_respects_available(
        ops in proptest::collection::vec((0u8..4, 1i64..2_000i64), 1..40),
    ) {
        let mut ledger = MarginLedger::new();
        let id = AccountId::new("acct");
        let now = Timestamp(1_700_000_000_000);
        ledger.deposit(&id, Hbar::new(dec!(10)), now).unwrap();

        for (op, raw) in ops {
            let amount = Hbar::new(Decimal::new(raw, 2));
            let available = ledger.available(&id);
            match op {
                0 => {
                    let result = ledger.lock(&id, amount, now);
                    prop_assert_eq!(result.is_err(), amount > available);
                }
                1 => {
                    let _ = ledger.release(&id, amount, now);
                }
                2 => {
                    let result = ledger.withdraw(&id, amount, now);
                    prop_assert_eq!(result.is_err(), amount > available);
                }
                _ => {
                    ledger.apply_balance_delta(&id, amount.negate(), now).unwrap();
                }
            }
            let account = ledger.get(&id).unwrap();
            prop_assert!(account.locked_hbar <= account.balance_hbar);
            prop_assert!(!account.balance_hbar.is_negative());
        }
    }

    /// Funding paid by longs equals funding received by shorts on balanced interest
    #[test]
    fn funding_is_sign_symmetric(
        size in amount_strategy(),
        rate_raw in -400i64..400i64,
    ) {
        let rate = Decimal::new(rate_raw, 4);
        let size = Hbar::new(size);
        let long = funding_amount(Side::Long, size, rate);
        let short = funding_amount(Side::Short, size, rate);
        prop_assert_eq!(long.add(short), Hbar::zero());
    }

    /// Funding rate never exceeds the hourly cap
    #[test]
    fn funding_rate_is_capped(
        mark in probability_strategy(),
        index in probability_strategy(),
    ) {
        let params = FundingParams::default();
        let rate = compute_funding_rate(mark, index, &params);
        prop_assert!(rate.abs() <= params.max_hourly_rate);
    }

    /// Option payoff never exceeds the notional
    #[test]
    fn payoff_bounded_by_size(
        mark in probability_strategy(),
        strike in probability_strategy(),
        size in amount_strategy(),
    ) {
        let size = Hbar::new(size);
        for option_type in [OptionType::Call, OptionType::Put] {
            let value = payoff(option_type, mark, strike, size);
            prop_assert!(!value.is_negative());
            prop_assert!(value <= size);
        }
    }

    /// Normal CDF is monotone and symmetric
    #[test]
    fn norm_cdf_monotone(x in -6.0f64..6.0, dx in 0.001f64..1.0) {
        prop_assert!(norm_cdf(x + dx) >= norm_cdf(x));
        prop_assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-6);
    }
}

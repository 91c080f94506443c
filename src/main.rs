//! Outcome derivatives engine simulation.
//!
//! Walks the engine through a curve trade, a CLOB-seeded perpetual with funding and
//! liquidation, an option round trip and the margin lock rules.

use outcome_perps::*;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

const START: i64 = 1_700_000_000_000;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Outcome Derivatives Engine Simulation");
    println!("LMSR curve, quote book, perpetuals, funding, options\n");

    scenario_1_curve_trade()?;
    scenario_2_clob_perpetual()?;
    scenario_3_call_option()?;
    scenario_4_margin_locks()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn yes_no() -> Vec<Outcome> {
    vec![Outcome::new("YES"), Outcome::new("NO")]
}

fn engine_at_start() -> Engine {
    let mut engine = Engine::new(EngineConfig::default());
    engine.set_time(Timestamp(START));
    engine
}

/// A 10 HBAR buy on a b=25 curve moves YES above 50%.
fn scenario_1_curve_trade() -> Result<(), EngineError> {
    println!("Scenario 1: LMSR Curve Trade\n");

    let mut engine = engine_at_start();
    let market_id = MarketId::new("curve-1");
    let funding = required_curve_funding(25.0, 2);
    engine.add_market(Market::curve(market_id.clone(), yes_no(), Timestamp(START).plus_days(30), 25.0, funding))?;

    let yes = Outcome::new("YES");
    let quote = engine.quote_curve_trade(&market_id, &yes, dec!(10))?;
    println!("  Quote: {:.4} shares @ avg {}", quote.shares, quote.average_price);

    let result = engine.execute_curve_trade(&AccountId::new("0.0.1001"), &market_id, &yes, dec!(10))?;
    let odds = &result.quote.odds_after;
    println!("  Odds after: YES {}%, NO {}%", odds[&yes], odds[&Outcome::new("NO")]);
    println!("  Mark after trade: {}\n", result.mark_price);
    Ok(())
}

/// Quotes seed a CLOB market at 40/60, a 5x long opens at 0.40, funding settles,
/// then a price drop liquidates it.
fn scenario_2_clob_perpetual() -> Result<(), EngineError> {
    println!("Scenario 2: CLOB Perpetual\n");

    let mut engine = engine_at_start();
    let market_id = MarketId::new("clob-1");
    engine.add_market(Market::clob(market_id.clone(), yes_no(), Timestamp(START).plus_days(30)))?;

    let maker = AccountId::new("0.0.2001");
    for (outcome, bid, ask) in [("YES", dec!(0.38), dec!(0.42)), ("NO", dec!(0.58), dec!(0.62))] {
        for (side, price) in [(OrderSide::Bid, bid), (OrderSide::Ask, ask)] {
            engine.publish_order(OrderRequest {
                account_id: maker.clone(),
                market_id: market_id.clone(),
                outcome: Outcome::new(outcome),
                side,
                quantity: dec!(100),
                price,
            })?;
        }
    }
    let seeded = engine.seed_clob_odds(&market_id, &[])?;
    println!("  Seeded odds: {:?}", seeded);

    let long = AccountId::new("0.0.2002");
    let short = AccountId::new("0.0.2003");
    engine.deposit_margin(&long, Hbar::new(dec!(50)))?;
    engine.deposit_margin(&short, Hbar::new(dec!(50)))?;

    let yes = Outcome::new("YES");
    let position = engine.open_position(&long, &market_id, &yes, Side::Long, Hbar::new(dec!(100)), dec!(5))?;
    engine.open_position(&short, &market_id, &yes, Side::Short, Hbar::new(dec!(100)), dec!(5))?;
    println!(
        "  LONG 100 HBAR @ {} with 5x, margin {}, liquidation price {}",
        position.entry_price,
        position.margin_hbar.value(),
        position.liquidation_price
    );

    engine.advance_time(MS_PER_HOUR);
    let funding = engine.settle_funding(&market_id, &yes)?;
    println!(
        "  Funding rate {}: longs paid {}, shorts paid {}",
        funding.rate.rate,
        funding.total_long_payments.value(),
        funding.total_short_payments.value()
    );

    let mut odds = BTreeMap::new();
    odds.insert(yes.clone(), dec!(30));
    odds.insert(Outcome::new("NO"), dec!(70));
    engine.set_market_odds(&market_id, &odds)?;
    engine.advance_time(MS_PER_HOUR);
    engine.record_trade(&market_id, &yes, dec!(0.30))?;

    let sweep = engine.check_liquidations(&market_id, &yes)?;
    for event in &sweep.liquidations {
        println!(
            "  Liquidated {} at mark {}: forfeited {}, tier {:?}",
            event.position,
            event.mark_price,
            event.forfeited_margin.value(),
            event.tier
        );
    }
    println!("  Insurance fund: {}\n", engine.insurance_fund().balance.value());
    Ok(())
}

/// CALL strike 0.5, size 50, premium 2, exercised at 0.7.
fn scenario_3_call_option() -> Result<(), EngineError> {
    println!("Scenario 3: Call Option\n");

    let mut engine = engine_at_start();
    let market_id = MarketId::new("opt-1");
    engine.add_market(Market::clob(market_id.clone(), yes_no(), Timestamp(START).plus_days(30)))?;

    let writer = AccountId::new("0.0.3001");
    let holder = AccountId::new("0.0.3002");
    engine.deposit_margin(&writer, Hbar::new(dec!(60)))?;
    engine.deposit_margin(&holder, Hbar::new(dec!(5)))?;

    let yes = Outcome::new("YES");
    let option = engine.write_option(WriteOptionRequest {
        writer_account_id: writer.clone(),
        market_id: market_id.clone(),
        outcome: yes.clone(),
        option_type: OptionType::Call,
        style: OptionStyle::American,
        strike_price: dec!(0.5),
        size_hbar: Hbar::new(dec!(50)),
        premium_hbar: Hbar::new(dec!(2)),
        expiry: Timestamp(START).plus_days(7),
        volatility: None,
    })?;
    println!("  Written {}, theoretical premium {}", option.id, option.theoretical_premium_hbar.value());
    engine.buy_option(&holder, option.id)?;

    let mut odds = BTreeMap::new();
    odds.insert(yes.clone(), dec!(70));
    odds.insert(Outcome::new("NO"), dec!(30));
    engine.set_market_odds(&market_id, &odds)?;
    engine.advance_time(MS_PER_HOUR);
    engine.record_trade(&market_id, &yes, dec!(0.70))?;

    let exercise = engine.exercise_option(&holder, option.id)?;
    println!(
        "  Exercised at {}: holder receives {}, writer keeps {}",
        exercise.settlement_price,
        exercise.payoff_hbar.value(),
        exercise.returned_to_writer_hbar.value()
    );
    println!("  Holder balance {}\n", engine.available_margin(&holder).value());
    Ok(())
}

/// lock(15) fails on a 10 HBAR balance, lock(10) succeeds and leaves nothing to withdraw.
fn scenario_4_margin_locks() -> Result<(), EngineError> {
    println!("Scenario 4: Margin Locks\n");

    let mut engine = engine_at_start();
    let account = AccountId::new("0.0.4001");
    engine.deposit_margin(&account, Hbar::new(dec!(10)))?;

    match engine.lock_margin(&account, Hbar::new(dec!(15))) {
        Ok(_) => println!("  lock 15: unexpected success"),
        Err(err) => println!("  lock 15: {err}"),
    }
    let locked = engine.lock_margin(&account, Hbar::new(dec!(10)))?;
    println!("  lock 10: locked {}", locked.locked_hbar.value());
    match engine.withdraw_margin(&account, Hbar::new(dec!(1))) {
        Ok(_) => println!("  withdraw 1: unexpected success"),
        Err(err) => println!("  withdraw 1: {err}"),
    }

    let events = engine.recent_events(3);
    println!("  Last {} events:", events.len());
    for event in events {
        println!("    #{} {}", event.id.0, event.payload.kind());
    }
    Ok(())
}

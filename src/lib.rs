// outcome-perps: derivatives engine for prediction-market outcomes.
// prices are probabilities in (0, 1); collateral is HBAR.
// all computation is deterministic; the engine owns its clock and its state.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Side, Hbar, Leverage, Timestamp, rounding
//   2.x  market.rs: market catalog entry, odds, curve funding
//   2.1x amm.rs: LMSR curve, bisection share solver, trade quotes
//   2.2x order.rs: quote log, book views, CLOB odds seeding
//   3.x  margin.rs: initial/maintenance margin, effective equity
//   4.x  position.rs: perpetual position struct and pnl
//   5.x  funding.rs: hourly funding rate and payments
//   6.x  liquidation.rs: liquidation price, events, insurance fund
//   6.5  derivative.rs: perpetual/option sum type
//   7.x  config.rs: oracle, funding, options, audit params, env presets
//   8.x  engine/: core engine: markets, margin, orders, positions, funding, options,
//        liquidations, snapshots
//   9.x  options.rs: logit-space Black-Scholes, payoff, contracts
//   10.x account.rs: margin accounts and the ledger
//   11.x events.rs: state transition events
//   11.5 audit.rs: audit outbox and ledger sink
//   13.x mark_price.rs: median-of-three mark price oracle

// core modules
pub mod account;
pub mod amm;
pub mod derivative;
pub mod engine;
pub mod events;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod mark_price;
pub mod market;
pub mod options;
pub mod order;
pub mod position;
pub mod types;

// integration modules
pub mod audit;
pub mod config;

// re exports for convenience
pub use account::*;
pub use amm::*;
pub use audit::*;
pub use config::*;
pub use derivative::*;
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use liquidation::*;
pub use margin::*;
pub use mark_price::*;
pub use market::*;
pub use options::*;
pub use order::*;
pub use position::*;
pub use types::*;

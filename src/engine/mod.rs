// 8.0: core engine. owns every subsystem's state and runs each operation as a
// straight-line sequence: validate, read, then mutate and emit.
// deterministic and single-threaded; the audit sink and disk are reached only through
// drain_audit and the snapshot functions.

mod core;
mod curve;
mod funding;
mod liquidations;
mod margin;
mod options;
mod orders;
mod positions;
mod pricing;
mod results;
mod snapshot;

pub use core::Engine;
pub use results::{
    CloseResult, CurveTradeResult, EngineError, ExerciseResult, FundingResult, LiquidationResult, OpenInterest,
};
pub use snapshot::{EngineSnapshot, PersistenceError, SNAPSHOT_VERSION};

//! Deployment top-up reconciliation
//!
//! ```text
//! Scheduler → ReconciliationEngine → (per pair) grant pages
//!                                  → (per grant) ConstraintEngine + TopUpExecutor
//! ```
//!
//! The engine owns concurrency and failure isolation. Amount sizing and
//! draining detection sit behind traits so either can be swapped without
//! touching the loop.

pub mod constraints;
pub mod draining;
pub mod engine;
pub mod events;
pub mod executor;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use constraints::{BalanceSnapshot, ConstraintEngine, Limits};
pub use draining::{
    DrainingDeployment, DrainingDeploymentFinder, EscrowDrainingFinder, TopUpAmountCalculator,
    WindowAmountCalculator,
};
pub use engine::{
    ChainServices, EngineSettings, GrantOutcome, GrantStatus, PairReport, ReconciliationEngine,
    RunReport,
};
pub use events::{ChannelEventSink, EventSink, TopUpEvent, TracingEventSink};
pub use executor::{DepositRequest, TopUpExecutor};
pub use scheduler::Scheduler;

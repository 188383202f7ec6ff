//! Benchmark scheduling
//!
//! - RoundCounters / CancelFlag: run accounting and cooperative shutdown
//! - EchoContext: scheduler state for one connection
//! - run_simple / run_wait_all / run_reliable: the scheduler loops
//! - Orchestrator: picks the backend and mode, produces the report

pub mod context;
pub mod counters;
pub mod orchestrator;
pub mod reliable;
pub mod simple;
pub mod slot;

pub use context::{EchoContext, FinishedRun, RunOutcome, WAIT_TICK};
pub use counters::{CancelFlag, RoundCounters};
pub use orchestrator::Orchestrator;
pub use reliable::run_reliable;
pub use simple::{run_simple, run_wait_all};
pub use slot::{ClientSlot, WaitSet};

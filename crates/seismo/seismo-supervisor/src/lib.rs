//! Watchdog supervisor and signal thread.

mod signal_router;
mod supervisor;

pub use signal_router::{SignalRouter, SHUTDOWN_INITIATED, SHUTDOWN_REQUESTED, SHUTDOWN_RUNNING};
pub use supervisor::{AggregateTotals, Supervisor, TickOutcome};

//! Scheduling and run coordination.

pub mod coordinator;
pub mod scheduler;
pub mod throttle;

pub use coordinator::{RunCoordinator, SyncOptions, SyncSummary, TERMINAL_REPORT_LIMIT};
pub use scheduler::{IngestScheduler, RunOptions, RunStats};
pub use throttle::ThrottleGate;

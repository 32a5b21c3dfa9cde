//! # Zapline Engine
//!
//! The background half of the scheduler: the dispatch loop that fires due
//! schedules, the bulk coordinator that fans one message out to many
//! recipients with pacing, and the read-side stats aggregator.
//!
//! ```text
//! run_dispatcher (tokio interval)
//!   └── tick: list_due → claim → Transport::send (timed) → sent/requeue/failed
//!
//! BulkCoordinator
//!   ├── dispatch_bulk: strict input order, paced, failures isolated
//!   └── schedule_bulk: N deferred Schedule creates
//! ```

pub mod bulk;
pub mod engine;
pub mod stats;

pub use bulk::{BulkCoordinator, BulkRecipient};
pub use engine::{DispatchEngine, TickOutcome, run_dispatcher};
pub use stats::compute_stats;

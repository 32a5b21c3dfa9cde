//! Read-side stats aggregation — no state of its own.

use zapline_core::error::Result;
use zapline_core::types::{ScheduleStats, ScheduleStatus};
use zapline_store::ScheduleStore;

/// Derive per-status counts from the store's current contents. In-flight
/// rows count as pending: they are unfinished work from the operator's view.
/// The buckets partition the store, so they always sum to `total`.
pub fn compute_stats(store: &ScheduleStore) -> Result<ScheduleStats> {
    let mut stats = ScheduleStats::default();
    for (status, count) in store.status_counts()? {
        match status {
            ScheduleStatus::Pending | ScheduleStatus::InFlight => stats.pending += count,
            ScheduleStatus::Sent => stats.sent += count,
            ScheduleStatus::Failed => stats.failed += count,
            ScheduleStatus::Cancelled => stats.cancelled += count,
        }
        stats.total += count;
    }
    Ok(stats)
}

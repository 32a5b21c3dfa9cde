//! Dispatch engine — the recurring loop that fires due schedules.
//!
//! Every pending schedule whose due time has passed is attempted exactly once
//! per firing: the atomic store claim is what keeps a second concurrent tick
//! (or a racing cancel) from double-processing a record. Items are processed
//! sequentially in `scheduled_at` order, and one item's failure never aborts
//! the rest of the tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use zapline_core::config::EngineConfig;
use zapline_core::error::{Result, TransportError};
use zapline_core::transport::Transport;
use zapline_core::types::Schedule;
use zapline_store::ScheduleStore;

/// What happened to one claimed schedule during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Transport accepted the message.
    Sent,
    /// Retryable failure under the attempt bound; due time pushed back.
    Requeued,
    /// Terminal failure — non-retryable or attempts exhausted.
    Failed,
    /// Lost the claim (concurrent tick or cancel got there first).
    Skipped,
}

/// The scheduler engine: owns retry policy and failure classification.
pub struct DispatchEngine {
    store: Arc<ScheduleStore>,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
        }
    }

    /// One pass over the due schedules. Store failure on the due query ends
    /// the tick (retried on the next one); per-item failures are isolated.
    pub async fn tick(&self) -> Result<Vec<(String, TickOutcome)>> {
        let now = Utc::now();
        let due = self.store.list_due(now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = due.len(), "dispatch tick: due schedules");

        let mut outcomes = Vec::with_capacity(due.len());
        for schedule in due {
            let id = schedule.id.clone();
            match self.process_one(schedule).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(e) => {
                    // Store-level trouble for this record; leave it for a
                    // later tick rather than aborting the rest.
                    tracing::warn!(id = %id, error = %e, "dispatch: store error on item");
                }
            }
        }
        Ok(outcomes)
    }

    /// Claim and attempt one due schedule.
    async fn process_one(&self, schedule: Schedule) -> Result<TickOutcome> {
        if !self.store.claim(&schedule.id)? {
            tracing::debug!(id = %schedule.id, "dispatch: claim lost, skipping");
            return Ok(TickOutcome::Skipped);
        }

        let send = self
            .transport
            .send(&schedule.recipient, &schedule.message);
        let deadline = Duration::from_secs(self.config.send_timeout_secs);
        let result = match tokio::time::timeout(deadline, send).await {
            Ok(Ok(message_id)) => {
                self.store.mark_sent(&schedule.id)?;
                tracing::info!(
                    id = %schedule.id,
                    message_id = %message_id,
                    recipient = %schedule.recipient.value,
                    "schedule dispatched"
                );
                return Ok(TickOutcome::Sent);
            }
            Ok(Err(e)) => e,
            // A hanging transport call must not stall the tick; a timeout is
            // a retryable failure like any other.
            Err(_elapsed) => TransportError::Timeout,
        };

        let attempt = schedule.attempt_count + 1;
        if result.retryable() && attempt < self.config.max_attempts {
            let next_at = Utc::now() + chrono::Duration::seconds(self.config.retry_backoff_secs as i64);
            self.store
                .requeue(&schedule.id, &result.to_string(), next_at)?;
            tracing::warn!(
                id = %schedule.id,
                attempt,
                next_at = %next_at,
                error = %result,
                "schedule requeued after retryable failure"
            );
            Ok(TickOutcome::Requeued)
        } else {
            self.store.mark_failed(&schedule.id, &result.to_string())?;
            tracing::error!(
                id = %schedule.id,
                attempt,
                error = %result,
                "schedule failed terminally"
            );
            Ok(TickOutcome::Failed)
        }
    }

    /// Reset claims stranded by a crash. Run once before the first tick.
    pub fn recover(&self) -> Result<usize> {
        self.store.recover_stranded()
    }
}

/// Run the dispatch loop until the process exits. Intended to be spawned as
/// a background tokio task.
pub async fn run_dispatcher(engine: Arc<DispatchEngine>) {
    if let Err(e) = engine.recover() {
        tracing::warn!(error = %e, "startup claim recovery failed");
    }

    let period = Duration::from_secs(engine.config.poll_interval_secs);
    tracing::info!(interval_secs = period.as_secs(), "dispatcher started");
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        match engine.tick().await {
            Ok(outcomes) if !outcomes.is_empty() => {
                tracing::debug!(processed = outcomes.len(), "dispatch tick complete");
            }
            Ok(_) => {}
            // Store unreachable: skip this tick, try again on the next one.
            Err(e) => tracing::warn!(error = %e, "dispatch tick aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBehavior, MockTransport};
    use zapline_core::types::{Recipient, RecipientKind, ScheduleStatus};

    fn setup(config: EngineConfig) -> (Arc<ScheduleStore>, Arc<MockTransport>, DispatchEngine) {
        let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
        let transport = Arc::new(MockTransport::new());
        let engine = DispatchEngine::new(store.clone(), transport.clone(), config);
        (store, transport, engine)
    }

    fn private(value: &str) -> Recipient {
        Recipient::new(value, RecipientKind::Private).unwrap()
    }

    #[tokio::test]
    async fn test_due_schedule_is_sent() {
        let (store, transport, engine) = setup(EngineConfig::default());
        let s = store.create(private("111"), "hello", -1).unwrap();

        let outcomes = engine.tick().await.unwrap();
        assert_eq!(outcomes, vec![(s.id.clone(), TickOutcome::Sent)]);
        assert_eq!(transport.call_count(), 1);

        let loaded = store.get(&s.id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Sent);
        assert!(loaded.sent_at.is_some());
    }

    #[tokio::test]
    async fn test_future_schedule_is_untouched() {
        let (store, transport, engine) = setup(EngineConfig::default());
        store.create(private("111"), "later", 30).unwrap();

        assert!(engine.tick().await.unwrap().is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_terminally() {
        let (store, transport, engine) = setup(EngineConfig::default());
        let s = store.create(private("111"), "hi", -1).unwrap();
        transport.script(
            "111",
            MockBehavior::Fail(TransportError::InvalidRecipient("not on whatsapp".into())),
        );

        let outcomes = engine.tick().await.unwrap();
        assert_eq!(outcomes, vec![(s.id.clone(), TickOutcome::Failed)]);

        let loaded = store.get(&s.id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Failed);
        assert_eq!(loaded.attempt_count, 1);

        // Never revisited by a later tick
        assert!(engine.tick().await.unwrap().is_empty());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_backs_off_and_is_not_revisited_early() {
        let (store, transport, engine) = setup(EngineConfig {
            retry_backoff_secs: 120,
            ..EngineConfig::default()
        });
        let s = store.create(private("111"), "hi", -1).unwrap();
        transport.script("111", MockBehavior::Fail(TransportError::RateLimited));

        let outcomes = engine.tick().await.unwrap();
        assert_eq!(outcomes, vec![(s.id.clone(), TickOutcome::Requeued)]);
        let loaded = store.get(&s.id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(loaded.attempt_count, 1);

        // The immediately-next tick precedes the backoff window
        assert!(engine.tick().await.unwrap().is_empty());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_retryable_is_revisited_after_backoff() {
        let (store, transport, engine) = setup(EngineConfig {
            retry_backoff_secs: 0,
            ..EngineConfig::default()
        });
        let s = store.create(private("111"), "hi", -1).unwrap();
        transport.script("111", MockBehavior::Fail(TransportError::Timeout));

        assert_eq!(
            engine.tick().await.unwrap(),
            vec![(s.id.clone(), TickOutcome::Requeued)]
        );
        // Zero backoff: due again, and the unscripted retry succeeds
        assert_eq!(
            engine.tick().await.unwrap(),
            vec![(s.id.clone(), TickOutcome::Sent)]
        );
        assert_eq!(store.get(&s.id).unwrap().status, ScheduleStatus::Sent);
    }

    #[tokio::test]
    async fn test_attempts_exhausted_becomes_failed() {
        let (store, transport, engine) = setup(EngineConfig {
            max_attempts: 2,
            retry_backoff_secs: 0,
            ..EngineConfig::default()
        });
        let s = store.create(private("111"), "hi", -1).unwrap();
        transport.script("111", MockBehavior::Fail(TransportError::RateLimited));
        transport.script("111", MockBehavior::Fail(TransportError::RateLimited));

        assert_eq!(
            engine.tick().await.unwrap(),
            vec![(s.id.clone(), TickOutcome::Requeued)]
        );
        assert_eq!(
            engine.tick().await.unwrap(),
            vec![(s.id.clone(), TickOutcome::Failed)]
        );

        let loaded = store.get(&s.id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Failed);
        assert_eq!(loaded.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_one_failure_never_blocks_siblings() {
        let (store, transport, engine) = setup(EngineConfig::default());
        // Created oldest-due first to pin the processing order
        let a = store.create(private("aaa111"), "a", -30).unwrap();
        let b = store.create(private("bbb222"), "b", -20).unwrap();
        let c = store.create(private("ccc333"), "c", -10).unwrap();
        transport.script(
            "aaa111",
            MockBehavior::Fail(TransportError::InvalidRecipient("bad".into())),
        );

        let outcomes = engine.tick().await.unwrap();
        assert_eq!(
            outcomes,
            vec![
                (a.id.clone(), TickOutcome::Failed),
                (b.id.clone(), TickOutcome::Sent),
                (c.id.clone(), TickOutcome::Sent),
            ]
        );
        // scheduled_at-ascending processing order
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["aaa111", "bbb222", "ccc333"]
        );
    }

    #[tokio::test]
    async fn test_lost_claim_is_skipped_without_send() {
        let (store, transport, engine) = setup(EngineConfig::default());
        let s = store.create(private("111"), "hi", -1).unwrap();
        // A concurrent tick (simulated) claims the record between our
        // list_due and claim
        assert!(store.claim(&s.id).unwrap());

        let outcomes = engine.tick().await.unwrap();
        // list_due no longer returns the claimed record at all
        assert!(outcomes.is_empty() || outcomes == vec![(s.id.clone(), TickOutcome::Skipped)]);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_due_is_never_attempted() {
        let (store, transport, engine) = setup(EngineConfig::default());
        let s = store.create(private("111"), "hi", -1).unwrap();
        store.cancel(&s.id).unwrap();

        assert!(engine.tick().await.unwrap().is_empty());
        assert_eq!(transport.call_count(), 0);
        assert_eq!(store.get(&s.id).unwrap().status, ScheduleStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_transport_times_out_as_retryable() {
        let (store, transport, engine) = setup(EngineConfig {
            send_timeout_secs: 5,
            retry_backoff_secs: 300,
            ..EngineConfig::default()
        });
        let s = store.create(private("111"), "hi", -1).unwrap();
        transport.script("111", MockBehavior::Hang);

        let outcomes = engine.tick().await.unwrap();
        assert_eq!(outcomes, vec![(s.id.clone(), TickOutcome::Requeued)]);

        let loaded = store.get(&s.id).unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(loaded.last_error.as_deref(), Some("transport timeout"));
    }

    #[tokio::test]
    async fn test_recover_requeues_stranded_claims() {
        let (store, _transport, engine) = setup(EngineConfig::default());
        let s = store.create(private("111"), "hi", -1).unwrap();
        store.claim(&s.id).unwrap();

        assert_eq!(engine.recover().unwrap(), 1);
        assert_eq!(
            engine.tick().await.unwrap(),
            vec![(s.id.clone(), TickOutcome::Sent)]
        );
    }
}

//! Bulk dispatch coordinator — fans one message out to many recipients.
//!
//! Recipients are processed strictly in input order, one at a time, with a
//! fixed pacing delay between consecutive attempts. The delay is a floor
//! against transport spam flagging and applies after failed attempts too.
//! Failures don't cascade: the report always carries one entry per input
//! recipient.

use std::sync::Arc;
use std::time::Duration;

use zapline_core::config::ZaplineConfig;
use zapline_core::error::Result;
use zapline_core::transport::Transport;
use zapline_core::types::{
    BulkSendReport, Recipient, RecipientKind, Schedule, validate_message,
};
use zapline_store::ScheduleStore;

/// One recipient entry of a bulk request, before shape validation.
#[derive(Debug, Clone)]
pub struct BulkRecipient {
    pub value: String,
    pub kind: RecipientKind,
}

/// Coordinates immediate and deferred bulk sends.
#[derive(Clone)]
pub struct BulkCoordinator {
    store: Arc<ScheduleStore>,
    transport: Arc<dyn Transport>,
    pacing: Duration,
    send_timeout: Duration,
}

impl BulkCoordinator {
    pub fn new(
        store: Arc<ScheduleStore>,
        transport: Arc<dyn Transport>,
        config: &ZaplineConfig,
    ) -> Self {
        Self {
            store,
            transport,
            pacing: Duration::from_millis(config.bulk.inter_message_delay_ms),
            send_timeout: Duration::from_secs(config.engine.send_timeout_secs),
        }
    }

    /// Immediate bulk send: one transport attempt per recipient, no Schedule
    /// records. The shared body is validated once; a malformed recipient
    /// becomes a failed report entry, not a request-level error.
    pub async fn dispatch_bulk(
        &self,
        message: &str,
        recipients: &[BulkRecipient],
    ) -> Result<BulkSendReport> {
        validate_message(message)?;

        let mut report = BulkSendReport::default();
        for (i, entry) in recipients.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }

            let recipient = match Recipient::new(&entry.value, entry.kind) {
                Ok(r) => r,
                Err(e) => {
                    // Report the raw value as given; no transport attempt.
                    report.push(
                        Recipient {
                            value: entry.value.clone(),
                            kind: entry.kind,
                        },
                        Err(e.to_string()),
                    );
                    continue;
                }
            };

            let send = self.transport.send(&recipient, message);
            let outcome = match tokio::time::timeout(self.send_timeout, send).await {
                Ok(Ok(message_id)) => {
                    tracing::debug!(
                        recipient = %recipient.value,
                        message_id = %message_id,
                        "bulk send delivered"
                    );
                    Ok(())
                }
                Ok(Err(e)) => Err(e.to_string()),
                Err(_elapsed) => Err("transport timeout".to_string()),
            };
            if let Err(e) = &outcome {
                tracing::warn!(recipient = %recipient.value, error = %e, "bulk send failed");
            }
            report.push(recipient, outcome);
        }

        tracing::info!(
            recipients = recipients.len(),
            sent = report.sent,
            failed = report.failed,
            "bulk send complete"
        );
        Ok(report)
    }

    /// Deferred bulk send: N Schedule Store creates, dispatched later by the
    /// engine. All recipients are shape-checked up front so a bad entry
    /// rejects the request before anything is persisted.
    pub fn schedule_bulk(
        &self,
        message: &str,
        recipients: &[BulkRecipient],
        offset_minutes: i64,
    ) -> Result<Vec<Schedule>> {
        validate_message(message)?;
        let validated = recipients
            .iter()
            .map(|e| Recipient::new(&e.value, e.kind))
            .collect::<Result<Vec<_>>>()?;

        let mut created = Vec::with_capacity(validated.len());
        for recipient in validated {
            created.push(self.store.create(recipient, message, offset_minutes)?);
        }
        tracing::info!(count = created.len(), offset_minutes, "bulk schedules created");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBehavior, MockTransport};
    use zapline_core::error::{TransportError, ZaplineError};
    use zapline_core::types::ScheduleStatus;

    fn setup() -> (Arc<ScheduleStore>, Arc<MockTransport>, BulkCoordinator) {
        let store = Arc::new(ScheduleStore::open_in_memory().unwrap());
        let transport = Arc::new(MockTransport::new());
        let coordinator = BulkCoordinator::new(store.clone(), transport.clone(), &ZaplineConfig::default());
        (store, transport, coordinator)
    }

    fn entry(value: &str) -> BulkRecipient {
        BulkRecipient {
            value: value.into(),
            kind: RecipientKind::Private,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_cascade() {
        let (_store, transport, bulk) = setup();
        transport.script(
            "111",
            MockBehavior::Fail(TransportError::InvalidRecipient("bad".into())),
        );
        transport.script("333", MockBehavior::Fail(TransportError::RateLimited));

        let report = bulk
            .dispatch_bulk("promo", &[entry("111"), entry("222"), entry("333")])
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);
        assert!(!report.outcomes[0].success);
        assert!(report.outcomes[1].success);
        assert!(!report.outcomes[2].success);
        // B was attempted despite A's failure, in input order
        assert_eq!(*transport.calls.lock().unwrap(), vec!["111", "222", "333"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_floor_applies_between_attempts() {
        let (_store, transport, bulk) = setup();
        transport.script("111", MockBehavior::Fail(TransportError::RateLimited));

        let started = tokio::time::Instant::now();
        bulk.dispatch_bulk("promo", &[entry("111"), entry("222"), entry("333")])
            .await
            .unwrap();

        // Two gaps of 1s each, applied even after the failed first attempt
        assert!(started.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_recipient_is_reported_not_attempted() {
        let (_store, transport, bulk) = setup();
        let report = bulk
            .dispatch_bulk("promo", &[entry("not-a-number"), entry("222")])
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.outcomes[0].success);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("phone"));
        assert!(report.outcomes[1].success);
        // Only the valid recipient reached the transport
        assert_eq!(*transport.calls.lock().unwrap(), vec!["222"]);
    }

    #[tokio::test]
    async fn test_empty_message_rejected_before_any_attempt() {
        let (_store, transport, bulk) = setup();
        let result = bulk.dispatch_bulk("", &[entry("111")]).await;
        assert!(matches!(result, Err(ZaplineError::Validation(_))));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_send_times_out_and_continues() {
        let (_store, transport, bulk) = setup();
        transport.script("111", MockBehavior::Hang);

        let report = bulk
            .dispatch_bulk("promo", &[entry("111"), entry("222")])
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(
            report.outcomes[0].error.as_deref(),
            Some("transport timeout")
        );
    }

    #[tokio::test]
    async fn test_schedule_bulk_creates_pending_records() {
        let (store, transport, bulk) = setup();
        let created = bulk
            .schedule_bulk("promo", &[entry("111"), entry("222")], 30)
            .unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(transport.call_count(), 0);
        for s in &created {
            let loaded = store.get(&s.id).unwrap();
            assert_eq!(loaded.status, ScheduleStatus::Pending);
            let offset = loaded.scheduled_at - loaded.created_at;
            assert_eq!(offset.num_minutes(), 30);
        }
    }

    #[tokio::test]
    async fn test_schedule_bulk_rejects_bad_recipient_before_persisting() {
        let (store, _transport, bulk) = setup();
        let result = bulk.schedule_bulk("promo", &[entry("111"), entry("nope")], 5);
        assert!(matches!(result, Err(ZaplineError::Validation(_))));
        assert!(store.list_recent(10, None).unwrap().is_empty());
    }
}

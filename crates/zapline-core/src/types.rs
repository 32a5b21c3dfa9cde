//! Schedule data model — the unit of deferred or immediate message delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZaplineError};

/// WhatsApp text messages are capped at 4096 characters by the transport.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Who a message is addressed to. The kind is always tagged explicitly,
/// never inferred from the value's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Phone-number-shaped string (private) or opaque group identifier.
    pub value: String,
    pub kind: RecipientKind,
}

/// Recipient kind: a single contact or a group broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecipientKind {
    Private,
    Group,
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientKind::Private => write!(f, "private"),
            RecipientKind::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for RecipientKind {
    type Err = ZaplineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "private" => Ok(RecipientKind::Private),
            "group" => Ok(RecipientKind::Group),
            other => Err(ZaplineError::Validation(format!(
                "unknown recipient kind: {other}"
            ))),
        }
    }
}

impl Recipient {
    /// Build a validated recipient.
    pub fn new(value: &str, kind: RecipientKind) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ZaplineError::Validation("recipient is empty".into()));
        }
        if kind == RecipientKind::Private {
            let shape_ok = value
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '));
            if !shape_ok || !value.chars().any(|c| c.is_ascii_digit()) {
                return Err(ZaplineError::Validation(format!(
                    "recipient '{value}' is not phone-number-shaped"
                )));
            }
        }
        Ok(Self {
            value: value.to_string(),
            kind,
        })
    }
}

/// Validate a message body against the transport constraint.
pub fn validate_message(message: &str) -> Result<()> {
    if message.trim().is_empty() {
        return Err(ZaplineError::Validation("message is empty".into()));
    }
    let chars = message.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return Err(ZaplineError::Validation(format!(
            "message is {chars} characters, limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(())
}

/// Schedule lifecycle status.
///
/// `InFlight` is the transient claimed state inside one dispatch tick; every
/// other status is either the initial state or terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleStatus {
    Pending,
    InFlight,
    Sent,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::InFlight => "in_flight",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScheduleStatus::Sent | ScheduleStatus::Failed | ScheduleStatus::Cancelled
        )
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = ZaplineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ScheduleStatus::Pending),
            "in_flight" => Ok(ScheduleStatus::InFlight),
            "sent" => Ok(ScheduleStatus::Sent),
            "failed" => Ok(ScheduleStatus::Failed),
            "cancelled" => Ok(ScheduleStatus::Cancelled),
            other => Err(ZaplineError::Store(format!(
                "unknown schedule status in store: {other}"
            ))),
        }
    }
}

/// A scheduled message send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique ID, assigned at creation, immutable.
    pub id: String,
    pub recipient: Recipient,
    /// Body text, non-empty, at most [`MAX_MESSAGE_CHARS`] characters.
    pub message: String,
    /// When dispatch should be attempted. Resolved once at creation from a
    /// relative offset; a retry backoff is the only thing that moves it.
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    /// Delivery attempts so far. Only failed attempts leave a trace here.
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Audit timestamp set when the transport accepted the message.
    pub sent_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Create a new pending schedule due `offset_minutes` from now.
    ///
    /// The due time is fixed here — re-resolving "now" later would silently
    /// drift the target.
    pub fn new(recipient: Recipient, message: &str, offset_minutes: i64) -> Result<Self> {
        validate_message(message)?;
        let now = Utc::now();
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient,
            message: message.to_string(),
            scheduled_at: now + chrono::Duration::minutes(offset_minutes),
            status: ScheduleStatus::Pending,
            created_at: now,
            attempt_count: 0,
            last_error: None,
            sent_at: None,
        })
    }

    /// Whether this schedule is due for dispatch as of `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Pending && self.scheduled_at <= now
    }
}

/// Per-recipient outcome of one bulk-send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub recipient: Recipient,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ordered per-recipient report from one bulk-send invocation.
/// Ephemeral — returned to the caller, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkSendReport {
    pub outcomes: Vec<BulkOutcome>,
    pub sent: usize,
    pub failed: usize,
}

impl BulkSendReport {
    /// Append an outcome, keeping the counters consistent.
    pub fn push(&mut self, recipient: Recipient, result: std::result::Result<(), String>) {
        match result {
            Ok(()) => {
                self.sent += 1;
                self.outcomes.push(BulkOutcome {
                    recipient,
                    success: true,
                    error: None,
                });
            }
            Err(e) => {
                self.failed += 1;
                self.outcomes.push(BulkOutcome {
                    recipient,
                    success: false,
                    error: Some(e),
                });
            }
        }
    }
}

/// Status counts over the Schedule Store, derived on demand.
/// `pending` includes transiently in-flight rows; the four buckets partition
/// the store, so they always sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_recipient_shape() {
        assert!(Recipient::new("+49 170 1234567", RecipientKind::Private).is_ok());
        assert!(Recipient::new("(11) 98765-4321", RecipientKind::Private).is_ok());
        assert!(Recipient::new("", RecipientKind::Private).is_err());
        assert!(Recipient::new("not-a-number", RecipientKind::Private).is_err());
        assert!(Recipient::new("+++", RecipientKind::Private).is_err());
    }

    #[test]
    fn test_group_recipient_is_opaque() {
        assert!(Recipient::new("pastry-lovers@g.us", RecipientKind::Group).is_ok());
        assert!(Recipient::new("", RecipientKind::Group).is_err());
    }

    #[test]
    fn test_message_bounds() {
        assert!(validate_message("hello").is_ok());
        assert!(validate_message("").is_err());
        assert!(validate_message("   ").is_err());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(validate_message(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }

    #[test]
    fn test_scheduled_at_fixed_from_offset() {
        let r = Recipient::new("5511987654321", RecipientKind::Private).unwrap();
        let s = Schedule::new(r, "hi", 30).unwrap();
        let offset = s.scheduled_at - s.created_at;
        assert_eq!(offset.num_minutes(), 30);
        assert_eq!(s.status, ScheduleStatus::Pending);
        assert_eq!(s.attempt_count, 0);
    }

    #[test]
    fn test_due_predicate() {
        let r = Recipient::new("5511987654321", RecipientKind::Private).unwrap();
        let s = Schedule::new(r, "hi", 10).unwrap();
        assert!(!s.is_due(Utc::now()));
        assert!(s.is_due(Utc::now() + chrono::Duration::minutes(11)));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ScheduleStatus::Pending,
            ScheduleStatus::InFlight,
            ScheduleStatus::Sent,
            ScheduleStatus::Failed,
            ScheduleStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ScheduleStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ScheduleStatus>().is_err());
    }

    #[test]
    fn test_bulk_report_counters() {
        let mut report = BulkSendReport::default();
        let a = Recipient::new("111", RecipientKind::Private).unwrap();
        let b = Recipient::new("222", RecipientKind::Private).unwrap();
        report.push(a, Err("nope".into()));
        report.push(b, Ok(()));
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.outcomes[0].success);
        assert!(report.outcomes[1].success);
    }
}

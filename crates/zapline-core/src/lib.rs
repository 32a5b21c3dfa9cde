//! # Zapline Core
//!
//! Shared foundation for the Zapline message scheduler: the Schedule data
//! model, the error taxonomy, the TOML configuration system, and the
//! `Transport` capability trait that delivery backends implement.
//!
//! ## Architecture
//! ```text
//! Gateway (HTTP) ──► ScheduleStore (SQLite) ◄── DispatchEngine (tokio interval)
//!                         │                           │
//!                         └── StatsAggregator         └── Transport (WhatsApp Cloud API)
//!
//! BulkCoordinator ──► Transport (immediate) or ScheduleStore (deferred)
//! ```

pub mod config;
pub mod error;
pub mod transport;
pub mod types;

pub use config::{BulkConfig, EngineConfig, GatewayConfig, WhatsAppConfig, ZaplineConfig};
pub use error::{Result, TransportError, ZaplineError};
pub use transport::{MessageId, Transport};
pub use types::{
    BulkOutcome, BulkSendReport, Recipient, RecipientKind, Schedule, ScheduleStats,
    ScheduleStatus, MAX_MESSAGE_CHARS,
};

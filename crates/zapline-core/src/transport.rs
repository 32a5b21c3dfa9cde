//! The injected delivery capability.
//!
//! The engine and bulk coordinator only ever talk to this trait; the concrete
//! WhatsApp Cloud API client lives in `zapline-transport`, and tests inject
//! scripted mocks.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::Recipient;

/// Transport-assigned identifier for an accepted message.
pub type MessageId = String;

/// A fallible, rate-limited message delivery backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Backend name for logs ("whatsapp", "mock", ...).
    fn name(&self) -> &str;

    /// Deliver `body` to `recipient`. Errors carry their own retryability
    /// classification; the caller decides what to do with it.
    async fn send(
        &self,
        recipient: &Recipient,
        body: &str,
    ) -> Result<MessageId, TransportError>;

    /// Verify credentials/reachability at startup. Default: nothing to check.
    async fn verify(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

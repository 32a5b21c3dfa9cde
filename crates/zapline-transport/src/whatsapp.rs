//! WhatsApp Business Cloud API transport.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for messaging.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.
//!
//! HTTP outcomes map onto the retryability taxonomy: 429 is rate limiting,
//! 5xx and network errors are transient, 4xx payload errors are terminal.

use async_trait::async_trait;

use zapline_core::config::WhatsAppConfig;
use zapline_core::error::TransportError;
use zapline_core::transport::{MessageId, Transport};
use zapline_core::types::{Recipient, RecipientKind};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

/// WhatsApp Cloud API client.
pub struct WhatsAppTransport {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{GRAPH_API_BASE}/{}/messages", self.config.phone_number_id)
    }

    /// Cloud API phone numbers are digits-only with country code; strip the
    /// formatting symbols the validator allows.
    fn wire_recipient(recipient: &Recipient) -> String {
        match recipient.kind {
            RecipientKind::Private => recipient
                .value
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect(),
            RecipientKind::Group => recipient.value.clone(),
        }
    }

    fn classify_api_error(status: reqwest::StatusCode, body: &str) -> TransportError {
        if status.as_u16() == 429 {
            return TransportError::RateLimited;
        }
        if status.is_server_error() {
            return TransportError::Unreachable(format!("whatsapp api {status}"));
        }

        // 4xx: look at the Graph error payload to tell a bad recipient from
        // a bad request.
        let detail: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
        let message = detail["error"]["message"].as_str().unwrap_or(body);
        let code = detail["error"]["code"].as_u64().unwrap_or(0);

        // 131026: not a WhatsApp user; 131030: recipient not allowed;
        // 131021: recipient unable to receive this message.
        match code {
            131026 | 131030 | 131021 => TransportError::InvalidRecipient(message.to_string()),
            _ if message.to_ascii_lowercase().contains("recipient") => {
                TransportError::InvalidRecipient(message.to_string())
            }
            _ => TransportError::Rejected(format!("whatsapp api {status}: {message}")),
        }
    }

    fn classify_request_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Unreachable(format!("whatsapp api request failed: {e}"))
        }
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(
        &self,
        recipient: &Recipient,
        body: &str,
    ) -> Result<MessageId, TransportError> {
        let to = Self::wire_recipient(recipient);
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": match recipient.kind {
                RecipientKind::Private => "individual",
                RecipientKind::Group => "group",
            },
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": body
            }
        });

        let response = self
            .client
            .post(self.messages_url())
            .header(
                "Authorization",
                format!("Bearer {}", self.config.access_token),
            )
            .json(&payload)
            .send()
            .await
            .map_err(Self::classify_request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::classify_api_error(status, &error_text));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Rejected(format!("invalid whatsapp response: {e}")))?;

        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!(message_id = %msg_id, to = %to, "whatsapp message sent");
        Ok(msg_id)
    }

    /// Verify credentials by fetching the phone-number resource.
    async fn verify(&self) -> Result<(), TransportError> {
        if self.config.access_token.is_empty() {
            return Err(TransportError::Rejected(
                "whatsapp access_token not configured".into(),
            ));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(TransportError::Rejected(
                "whatsapp phone_number_id not configured".into(),
            ));
        }

        let url = format!("{GRAPH_API_BASE}/{}", self.config.phone_number_id);
        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.access_token),
            )
            .send()
            .await
            .map_err(Self::classify_request_error)?;

        if response.status().is_success() {
            tracing::info!(
                phone_id = %self.config.phone_number_id,
                "whatsapp transport verified"
            );
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(TransportError::Rejected(format!(
                "whatsapp token verification failed: {text}"
            )))
        }
    }
}

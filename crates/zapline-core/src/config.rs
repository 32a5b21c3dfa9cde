//! Zapline configuration system.
//!
//! Everything the spec calls a tunable lives here with an explicit serde
//! default — poll interval, retry policy, bulk pacing, gateway binding,
//! transport credentials. Loaded from `~/.zapline/config.toml` unless
//! `ZAPLINE_CONFIG` points elsewhere.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ZaplineError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZaplineConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// Dispatch loop tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between dispatch ticks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Attempt bound before a retryable failure becomes terminal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff added to `scheduled_at` after a retryable failure.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// Per-call transport deadline; a hit counts as a retryable failure.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_poll_interval() -> u64 { 60 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_backoff() -> u64 { 120 }
fn default_send_timeout() -> u64 { 30 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// Bulk-send pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Floor between consecutive bulk attempts — anti-throttling, applies
    /// after failures too.
    #[serde(default = "default_inter_message_delay")]
    pub inter_message_delay_ms: u64,
}

fn default_inter_message_delay() -> u64 { 1000 }

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            inter_message_delay_ms: default_inter_message_delay(),
        }
    }
}

/// HTTP gateway binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8470 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
}

impl ZaplineConfig {
    /// Load config from `ZAPLINE_CONFIG` or the default path; missing file
    /// means defaults.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("ZAPLINE_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::default_path(),
        };
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ZaplineError::Config(format!("failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| ZaplineError::Config(format!("failed to parse config: {e}")))
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ZaplineError::Config(format!("failed to create config dir: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ZaplineError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| ZaplineError::Config(format!("failed to write config: {e}")))
    }

    /// Default config path (~/.zapline/config.toml).
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".zapline").join("config.toml")
    }

    /// Default database path (~/.zapline/schedules.db).
    pub fn default_db_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".zapline").join("schedules.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ZaplineConfig::default();
        assert_eq!(cfg.engine.poll_interval_secs, 60);
        assert_eq!(cfg.engine.max_attempts, 3);
        assert_eq!(cfg.engine.retry_backoff_secs, 120);
        assert_eq!(cfg.bulk.inter_message_delay_ms, 1000);
        assert_eq!(cfg.gateway.host, "127.0.0.1");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let cfg: ZaplineConfig = toml::from_str(
            r#"
            [engine]
            max_attempts = 5

            [whatsapp]
            access_token = "tok"
            phone_number_id = "123"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.engine.max_attempts, 5);
        assert_eq!(cfg.engine.poll_interval_secs, 60);
        assert_eq!(cfg.whatsapp.access_token, "tok");
        assert_eq!(cfg.bulk.inter_message_delay_ms, 1000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("zapline-config-test");
        let path = dir.join("config.toml");
        let mut cfg = ZaplineConfig::default();
        cfg.engine.retry_backoff_secs = 42;
        cfg.save_to(&path).unwrap();
        let loaded = ZaplineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.engine.retry_backoff_secs, 42);
        std::fs::remove_dir_all(&dir).ok();
    }
}

// Application configuration.
// Logging is on by default only in debug builds; the config file can override it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_RELAY_URL: &str = "wss://dropserver.onrender.com";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Top-level configuration of a call client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub relay: RelayConfig,
    pub ice_servers: Vec<IceServerConfig>,
    /// How long a disconnected peer connection may try to recover before
    /// `ConnectionLost` is reported.
    pub grace_period_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            ice_servers: vec![IceServerConfig::default()],
            grace_period_secs: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CallConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Checks the relay endpoint and the ICE server list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay.validate()?;

        if self.ice_servers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one ICE server is required".into(),
            ));
        }

        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ICE server '{}' has an empty url",
                    server.id
                )));
            }

            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// Relay endpoint and reconnection policy.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    /// Consecutive failed connection attempts before the relay is declared unavailable.
    pub reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RELAY_URL.into(),
            reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ConfigError::Invalid(format!(
                "relay url must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        if self.reconnect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// One STUN or TURN server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            id: "default-stun".into(),
            kind: IceServerKind::Stun,
            url: DEFAULT_STUN_URL.into(),
            username: None,
            credential: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `tracing` filter directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "dropcall_lib=debug,dropcall=info,webrtc=warn".into(),
        }
    }
}

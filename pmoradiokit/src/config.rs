//! Listener configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. The timing values mirror the defaults of the Phoenix
//! JavaScript client the RadioKit endpoint was built for.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default RadioKit stream endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://agenda.radiokitapp.org/api/stream/v1.0";

/// Default cadence of position callbacks (milliseconds)
pub const DEFAULT_POSITION_INTERVAL_MS: u64 = 1000;

/// Top-level listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "ListenerConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "ListenerConfig::default_position_interval")]
    pub position_interval_ms: u64,
    #[serde(default = "ListenerConfig::default_join_timeout")]
    pub join_timeout_ms: u64,
    #[serde(default = "ListenerConfig::default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

impl ListenerConfig {
    fn default_endpoint() -> String {
        DEFAULT_ENDPOINT.to_string()
    }

    const fn default_position_interval() -> u64 {
        DEFAULT_POSITION_INTERVAL_MS
    }

    const fn default_join_timeout() -> u64 {
        10_000
    }

    const fn default_heartbeat_interval() -> u64 {
        30_000
    }

    /// Parse a configuration from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Check intervals and endpoint
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("position_interval_ms", self.position_interval_ms),
            ("join_timeout_ms", self.join_timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::invalid_argument(format!(
                    "{name} must be a positive integer"
                )));
            }
        }

        let url = Url::parse(&self.endpoint)
            .map_err(|e| Error::invalid_argument(format!("endpoint {}: {e}", self.endpoint)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(Error::invalid_argument(format!(
                "endpoint scheme must be ws or wss, got {other}"
            ))),
        }
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            position_interval_ms: Self::default_position_interval(),
            join_timeout_ms: Self::default_join_timeout(),
            heartbeat_interval_ms: Self::default_heartbeat_interval(),
        }
    }
}

//! Phoenix Channels transport.
//!
//! RadioKit's stream endpoint is a Phoenix application. This module speaks
//! the V2 JSON serializer over `tokio-tungstenite`, enough for the listener:
//! joins with reply matching and timeout, server pushes routed to channel
//! handlers, heartbeats and leave. There is no automatic reconnection.
//!
//! # Example
//!
//! ```no_run
//! use pmoradiokit::phoenix::PhoenixTransport;
//! use pmoradiokit::{ListenerConfig, MetadataListener};
//! use std::sync::Arc;
//!
//! # fn main() -> pmoradiokit::Result<()> {
//! let config = ListenerConfig::from_yaml_str("join_timeout_ms: 5000")?;
//! let listener = MetadataListener::builder("token", "kexp")
//!     .transport(Arc::new(PhoenixTransport::from_config(&config)))
//!     .config(config)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod message;
mod socket;

pub use message::Message;
pub use socket::{socket_url, PhoenixChannel, PhoenixSocket};

use crate::config::ListenerConfig;
use crate::transport::{ConnectParams, Socket, Transport};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Opens [`PhoenixSocket`]s.
#[derive(Debug, Clone)]
pub struct PhoenixTransport {
    join_timeout: Duration,
    heartbeat_interval: Duration,
}

impl PhoenixTransport {
    pub fn new(join_timeout: Duration, heartbeat_interval: Duration) -> Self {
        install_crypto_provider();
        Self {
            join_timeout,
            heartbeat_interval,
        }
    }

    pub fn from_config(config: &ListenerConfig) -> Self {
        Self::new(config.join_timeout(), config.heartbeat_interval())
    }
}

impl Default for PhoenixTransport {
    fn default() -> Self {
        Self::from_config(&ListenerConfig::default())
    }
}

impl Transport for PhoenixTransport {
    fn open(&self, params: &ConnectParams) -> Arc<dyn Socket> {
        Arc::new(PhoenixSocket::new(
            &params.endpoint,
            &params.access_token,
            self.join_timeout,
            self.heartbeat_interval,
        ))
    }
}

/// rustls needs a process-wide provider before the first `wss://` handshake.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("rustls crypto provider already installed");
        }
    });
}

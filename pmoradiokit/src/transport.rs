//! Transport and channel capabilities.
//!
//! The listener does not speak any wire protocol itself. It drives a
//! [`Transport`] that opens [`Socket`]s, and joins topics through the
//! [`Channel`]s those sockets hand out. The `phoenix` feature provides a
//! WebSocket implementation; tests use an in-memory one.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Handler for socket error and close notifications
pub type SocketEventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handler for a named message pushed on a channel
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Parameters used to open a socket.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub endpoint: String,
    pub access_token: String,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Outcome of a channel join.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinReply {
    /// Joined; carries the server's response payload
    Ok(Value),
    /// Refused with a reason
    Error(String),
    /// No reply before the join deadline
    Timeout,
}

/// Opens persistent connections.
pub trait Transport: Send + Sync {
    fn open(&self, params: &ConnectParams) -> Arc<dyn Socket>;
}

/// A persistent connection.
///
/// `connect()` must not block: pushes issued before the connection is up are
/// queued by the implementation.
pub trait Socket: Send + Sync {
    fn on_error(&self, handler: SocketEventHandler);
    fn on_close(&self, handler: SocketEventHandler);
    fn connect(&self);
    fn disconnect(&self);
    fn channel(&self, topic: &str) -> Arc<dyn Channel>;
}

/// One topic on a socket.
#[async_trait]
pub trait Channel: Send + Sync {
    fn topic(&self) -> &str;
    fn on(&self, event: &str, handler: MessageHandler);
    async fn join(&self) -> JoinReply;
    fn leave(&self);
}

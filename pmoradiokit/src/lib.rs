//! RadioKit metadata listener for PMOMusic
//!
//! This crate passively follows the "now playing" metadata of a RadioKit
//! broadcast channel over a persistent Phoenix Channels connection, and
//! extrapolates the playback position between updates without polling.
//!
//! # Features
//!
//! - **Live Metadata**: every update pushed on `broadcast:metadata:<channel>`
//!   is handed to your update callback, `None` when metadata was cleared
//! - **Position Estimation**: when metadata carries a `duration` (ms), a
//!   position callback is fired on a fixed cadence until the track should
//!   have ended
//! - **Token Rotation**: the access token can be a closure, called again on
//!   every `start()`
//! - **Pluggable Transport**: the listener drives [`transport::Transport`];
//!   the `phoenix` feature (default) provides a WebSocket implementation
//!
//! # Example
//!
//! ```no_run
//! use pmoradiokit::MetadataListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = MetadataListener::new("my-access-token", "kexp")?;
//!
//!     listener
//!         .on_update(|metadata| match metadata {
//!             Some(map) => println!("Now playing: {:?}", map.get("title")),
//!             None => println!("Metadata cleared"),
//!         })
//!         .on_position(|position, duration| {
//!             println!("{} / {} s", position / 1000, duration / 1000);
//!         });
//!     listener.set_position_interval(500)?;
//!
//!     listener.start().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     listener.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Failure Model
//!
//! `start()` makes a single connection attempt. A refused or timed-out join
//! is reported as [`Error::SubscriptionFailure`] and leaves the listener
//! idle. Socket errors and closes after a successful start are only logged;
//! supervising reconnection is left to the caller (`stop()` then `start()`).

pub mod config;
pub mod credential;
pub mod error;
pub mod listener;
pub mod metadata;
pub mod position;
pub mod subscription;
pub mod transport;

#[cfg(feature = "phoenix")]
pub mod phoenix;

// Re-exports
pub use config::ListenerConfig;
pub use credential::CredentialSource;
pub use error::{Error, Result, SubscriptionFailure};
pub use listener::{
    ListenerBuilder, ListenerState, MetadataListener, PositionCallback, UpdateCallback,
};
pub use metadata::{MetadataMap, MetadataUpdate};
pub use position::{Anchor, Clock, SystemClock, Tick};
pub use subscription::{topic_for, TOPIC_NAMESPACE, UPDATE_EVENT};
pub use transport::{Channel, ConnectParams, JoinReply, Socket, Transport};

#[cfg(feature = "phoenix")]
pub use phoenix::PhoenixTransport;

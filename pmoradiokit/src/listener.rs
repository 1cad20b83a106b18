//! Metadata listener: lifecycle, subscription wiring and callbacks.
//!
//! # Example
//!
//! ```no_run
//! use pmoradiokit::MetadataListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = MetadataListener::new("my-access-token", "kexp")?;
//!     listener
//!         .on_update(|metadata| println!("Now playing: {:?}", metadata))
//!         .on_position(|position, duration| println!("{position}/{duration} ms"));
//!
//!     listener.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     listener.stop().await?;
//!     Ok(())
//! }
//! ```

use crate::config::ListenerConfig;
use crate::credential::CredentialSource;
use crate::error::{Error, Result};
use crate::metadata::{MetadataMap, MetadataUpdate};
use crate::position::{Anchor, Clock, PositionEstimator, SystemClock, Tick};
use crate::subscription::{topic_for, Subscription};
use crate::transport::{ConnectParams, Socket, Transport};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Called with each metadata snapshot; `None` means metadata was cleared
pub type UpdateCallback = Arc<dyn Fn(Option<&MetadataMap>) + Send + Sync>;

/// Called with `(position_ms, duration_ms)` while a duration is known
pub type PositionCallback = Arc<dyn Fn(i64, u64) + Send + Sync>;

/// Lifecycle state of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Passive listener for the metadata of one broadcast channel.
///
/// Use it to implement "what's on air" displays. The handle is cheap to
/// clone; all clones share the same lifecycle and callbacks. A listener can
/// be started and stopped any number of times.
#[derive(Clone)]
pub struct MetadataListener {
    shared: Arc<Shared>,
}

struct Shared {
    channel_id: String,
    credential: CredentialSource,
    endpoint: String,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ListenerState,
    update_callback: Option<UpdateCallback>,
    position_callback: Option<PositionCallback>,
    position_interval_ms: u64,
    runtime: Option<Handle>,
    socket: Option<Arc<dyn Socket>>,
    subscription: Option<Subscription>,
    pending_anchor: Option<Anchor>,
    estimator: PositionEstimator,
}

impl MetadataListener {
    /// Listener with the default configuration and transport
    pub fn new(
        credential: impl Into<CredentialSource>,
        channel_id: impl Into<String>,
    ) -> Result<Self> {
        Self::builder(credential, channel_id).build()
    }

    /// Create a builder for configuring the listener
    pub fn builder(
        credential: impl Into<CredentialSource>,
        channel_id: impl Into<String>,
    ) -> ListenerBuilder {
        ListenerBuilder {
            credential: credential.into(),
            channel_id: channel_id.into(),
            config: ListenerConfig::default(),
            transport: None,
            clock: None,
        }
    }

    /// Channel this listener observes
    pub fn channel_id(&self) -> &str {
        &self.shared.channel_id
    }

    /// Topic joined on the socket
    pub fn topic(&self) -> String {
        topic_for(&self.shared.channel_id)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        self.shared.lock().state
    }

    /// Whether a position timer is currently live
    pub fn has_position_timer(&self) -> bool {
        self.shared.lock().estimator.is_armed()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start listening to metadata updates.
    ///
    /// Makes a single connection attempt and does not retry. Resolves with
    /// the listener once the channel join succeeds.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the listener is not idle
    /// - `SubscriptionFailure` if the join is refused or times out; the
    ///   listener is idle again by the time the error is returned
    pub async fn start(&self) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::invalid_argument(format!("no tokio runtime: {e}")));

        {
            let mut inner = self.shared.lock();
            if inner.state != ListenerState::Idle {
                return Err(Error::InvalidTransition("attempt to start while not stopped"));
            }
            inner.runtime = Some(runtime?);
            inner.state = ListenerState::Starting;
        }
        debug!(channel = %self.shared.channel_id, "Starting");

        let socket = self.shared.open_socket();
        let guard = StartGuard {
            shared: &self.shared,
            socket: Arc::clone(&socket),
            defused: false,
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let joined = Subscription::join(socket.as_ref(), &self.shared.channel_id, move |update| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_update(update);
            }
        })
        .await;

        match joined {
            Ok(subscription) => {
                guard.defuse();
                let mut inner = self.shared.lock();
                inner.state = ListenerState::Running;
                inner.socket = Some(socket);
                inner.subscription = Some(subscription);
                let pending = inner.pending_anchor.take();
                self.shared.rearm(&mut inner, pending);
                Ok(self.clone())
            }
            Err(failure) => {
                drop(guard);
                Err(failure.into())
            }
        }
    }

    /// Stop listening to metadata updates.
    ///
    /// Clears the position timer, leaves the channel and closes the socket
    /// without waiting for the server.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the listener is not running.
    ///
    /// ```
    /// use pmoradiokit::{Error, ListenerState, MetadataListener};
    ///
    /// # tokio_test::block_on(async {
    /// let listener = MetadataListener::new("token", "kexp").unwrap();
    /// assert!(matches!(listener.stop().await, Err(Error::InvalidTransition(_))));
    /// assert_eq!(listener.state(), ListenerState::Idle);
    /// # });
    /// ```
    pub async fn stop(&self) -> Result<Self> {
        let (subscription, socket) = {
            let mut inner = self.shared.lock();
            if inner.state != ListenerState::Running {
                return Err(Error::InvalidTransition("attempt to stop when not started"));
            }
            inner.state = ListenerState::Stopping;
            debug!(channel = %self.shared.channel_id, "Stopping");
            if inner.estimator.clear() {
                debug!(channel = %self.shared.channel_id, "Clearing position interval");
            }
            (inner.subscription.take(), inner.socket.take())
        };

        if let Some(subscription) = subscription {
            subscription.leave();
        }
        if let Some(socket) = socket {
            socket.disconnect();
        }

        let mut inner = self.shared.lock();
        inner.runtime = None;
        inner.state = ListenerState::Idle;
        Ok(self.clone())
    }

    // ========================================================================
    // Callbacks and settings
    // ========================================================================

    /// Set or clear the metadata update callback
    pub fn set_update_callback(&self, callback: Option<UpdateCallback>) -> &Self {
        self.shared.lock().update_callback = callback;
        self
    }

    /// Set the metadata update callback from a closure
    pub fn on_update<F>(&self, f: F) -> &Self
    where
        F: Fn(Option<&MetadataMap>) + Send + Sync + 'static,
    {
        self.set_update_callback(Some(Arc::new(f)))
    }

    /// Currently set metadata update callback
    pub fn update_callback(&self) -> Option<UpdateCallback> {
        self.shared.lock().update_callback.clone()
    }

    /// Set or clear the position callback.
    ///
    /// A new callback takes effect from the next metadata update carrying a
    /// `duration`. Clearing it cancels the running position timer at once.
    ///
    /// The callback runs without the listener lock held, so it may call back
    /// into the listener. On a current-thread runtime nothing is invoked
    /// after clearing returns. On a multi-threaded runtime a tick already
    /// running on another worker may still complete one last invocation.
    pub fn set_position_callback(&self, callback: Option<PositionCallback>) -> &Self {
        let mut inner = self.shared.lock();
        if callback.is_none() && inner.estimator.clear() {
            debug!(channel = %self.shared.channel_id, "Clearing position interval");
        }
        inner.position_callback = callback;
        self
    }

    /// Set the position callback from a closure
    pub fn on_position<F>(&self, f: F) -> &Self
    where
        F: Fn(i64, u64) + Send + Sync + 'static,
    {
        self.set_position_callback(Some(Arc::new(f)))
    }

    /// Currently set position callback
    pub fn position_callback(&self) -> Option<PositionCallback> {
        self.shared.lock().position_callback.clone()
    }

    /// Set the position callback cadence in milliseconds.
    ///
    /// Applies from the next metadata update; a running timer keeps its
    /// cadence.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `interval_ms` is zero; the stored value is kept.
    pub fn set_position_interval(&self, interval_ms: u64) -> Result<&Self> {
        if interval_ms == 0 {
            return Err(Error::invalid_argument(
                "position interval must be a positive integer",
            ));
        }
        self.shared.lock().position_interval_ms = interval_ms;
        Ok(self)
    }

    /// Position callback cadence in milliseconds
    pub fn position_interval(&self) -> u64 {
        self.shared.lock().position_interval_ms
    }
}

impl fmt::Debug for MetadataListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataListener")
            .field("channel_id", &self.shared.channel_id)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the credential and open a connecting socket
    fn open_socket(&self) -> Arc<dyn Socket> {
        let params = ConnectParams {
            endpoint: self.endpoint.clone(),
            access_token: self.credential.resolve(),
        };
        let socket = self.transport.open(&params);

        let channel = self.channel_id.clone();
        socket.on_error(Arc::new(move |reason| {
            warn!(channel = %channel, reason, "Socket error");
        }));
        let channel = self.channel_id.clone();
        socket.on_close(Arc::new(move |reason| {
            warn!(channel = %channel, reason, "Socket closed");
        }));

        socket.connect();
        socket
    }

    fn handle_update(self: &Arc<Self>, update: MetadataUpdate) {
        let callback = {
            let inner = self.lock();
            match inner.state {
                ListenerState::Starting | ListenerState::Running => inner.update_callback.clone(),
                state => {
                    debug!(channel = %self.channel_id, %state, "Ignoring update");
                    return;
                }
            }
        };

        if let Some(callback) = callback {
            callback(update.metadata.as_ref());
        }

        let anchor = Anchor::from_update(&update);
        let mut inner = self.lock();
        match inner.state {
            ListenerState::Running => self.rearm(&mut inner, anchor),
            ListenerState::Starting => inner.pending_anchor = anchor,
            _ => {}
        }
    }

    /// Replace the position timer with one for `anchor`, if any
    fn rearm(self: &Arc<Self>, inner: &mut Inner, anchor: Option<Anchor>) {
        if inner.estimator.clear() {
            debug!(channel = %self.channel_id, "Clearing position interval");
        }

        let Some(anchor) = anchor else { return };
        if inner.position_callback.is_none() {
            return;
        }
        let Some(runtime) = inner.runtime.clone() else {
            return;
        };

        debug!(
            channel = %self.channel_id,
            duration_ms = anchor.duration_ms,
            interval_ms = inner.position_interval_ms,
            "Setting position interval"
        );
        let period = Duration::from_millis(inner.position_interval_ms);
        let weak = Arc::downgrade(self);
        inner.estimator.arm(
            &runtime,
            period,
            anchor,
            Arc::clone(&self.clock),
            move |generation, tick| match weak.upgrade() {
                Some(shared) => shared.on_position_tick(generation, tick),
                None => false,
            },
        );
    }

    fn on_position_tick(&self, generation: u64, tick: Tick) -> bool {
        let mut inner = self.lock();
        if inner.state != ListenerState::Running || !inner.estimator.is_current(generation) {
            return false;
        }
        let Some(anchor) = inner.estimator.anchor() else {
            return false;
        };

        let position = match tick {
            Tick::Position(position) => position,
            Tick::Expired(position) => {
                debug!(
                    channel = %self.channel_id,
                    position,
                    duration = anchor.duration_ms,
                    "Position > Duration"
                );
                inner.estimator.finish(generation);
                return false;
            }
        };

        let Some(callback) = inner.position_callback.clone() else {
            inner.estimator.finish(generation);
            return false;
        };
        drop(inner);

        callback(position, anchor.duration_ms);
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        inner.estimator.clear();
        if let Some(subscription) = inner.subscription.take() {
            subscription.leave();
        }
        if let Some(socket) = inner.socket.take() {
            socket.disconnect();
        }
    }
}

/// Reverts a start that did not reach `Running`.
///
/// Covers both a refused join and a `start()` future dropped mid-join.
struct StartGuard<'a> {
    shared: &'a Shared,
    socket: Arc<dyn Socket>,
    defused: bool,
}

impl StartGuard<'_> {
    fn defuse(mut self) {
        self.defused = true;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.defused {
            return;
        }
        {
            let mut inner = self.shared.lock();
            inner.state = ListenerState::Idle;
            inner.pending_anchor = None;
            inner.runtime = None;
        }
        debug!(channel = %self.shared.channel_id, "Start aborted, closing socket");
        self.socket.disconnect();
    }
}

/// Builder for [`MetadataListener`].
pub struct ListenerBuilder {
    credential: CredentialSource,
    channel_id: String,
    config: ListenerConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ListenerBuilder {
    pub fn config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<MetadataListener> {
        if self.channel_id.is_empty() {
            return Err(Error::invalid_argument("channel id must not be empty"));
        }
        self.config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&self.config)?,
        };

        Ok(MetadataListener {
            shared: Arc::new(Shared {
                channel_id: self.channel_id,
                credential: self.credential,
                endpoint: self.config.endpoint.clone(),
                transport,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                inner: Mutex::new(Inner {
                    state: ListenerState::Idle,
                    update_callback: None,
                    position_callback: None,
                    position_interval_ms: self.config.position_interval_ms,
                    runtime: None,
                    socket: None,
                    subscription: None,
                    pending_anchor: None,
                    estimator: PositionEstimator::default(),
                }),
            }),
        })
    }
}

#[cfg(feature = "phoenix")]
fn default_transport(config: &ListenerConfig) -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(crate::phoenix::PhoenixTransport::from_config(config)))
}

#[cfg(not(feature = "phoenix"))]
fn default_transport(_config: &ListenerConfig) -> Result<Arc<dyn Transport>> {
    Err(Error::invalid_argument(
        "no transport configured (enable the `phoenix` feature or call .transport())",
    ))
}

//! In-memory transport and paused clock shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use pmoradiokit::transport::{MessageHandler, SocketEventHandler};
use pmoradiokit::{
    Channel, Clock, ConnectParams, JoinReply, ListenerConfig, MetadataListener, MetadataMap,
    Socket, Transport,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Epoch milliseconds the test clock starts at
pub const BASE_MS: i64 = 1_700_000_000_000;

/// Wall clock that only moves with tokio's (paused) clock.
pub struct PausedClock {
    base_ms: i64,
    start: Instant,
}

impl PausedClock {
    pub fn new(base_ms: i64) -> Self {
        Self {
            base_ms,
            start: Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now_ms(&self) -> i64 {
        self.base_ms + self.start.elapsed().as_millis() as i64
    }
}

/// How fake channels answer `join()`.
#[derive(Clone)]
pub enum JoinMode {
    Reply(JoinReply),
    /// Wait until the test calls [`FakeChannel::resolve_join`]
    Held,
}

pub struct FakeTransport {
    mode: Mutex<JoinMode>,
    sockets: Mutex<Vec<Arc<FakeSocket>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::with_mode(JoinMode::Reply(JoinReply::Ok(json!({}))))
    }

    pub fn with_mode(mode: JoinMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            sockets: Mutex::new(Vec::new()),
        })
    }

    pub fn set_mode(&self, mode: JoinMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn sockets(&self) -> Vec<Arc<FakeSocket>> {
        self.sockets.lock().unwrap().clone()
    }

    pub fn last_socket(&self) -> Arc<FakeSocket> {
        self.sockets.lock().unwrap().last().cloned().expect("no socket opened")
    }

    /// Channel of the most recently opened socket
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.last_socket().last_channel()
    }
}

impl Transport for FakeTransport {
    fn open(&self, params: &ConnectParams) -> Arc<dyn Socket> {
        let socket = Arc::new(FakeSocket {
            params: params.clone(),
            mode: self.mode.lock().unwrap().clone(),
            connected: AtomicBool::new(false),
            disconnects: AtomicUsize::new(0),
            error_handlers: Mutex::new(Vec::new()),
            close_handlers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
        });
        self.sockets.lock().unwrap().push(Arc::clone(&socket));
        socket
    }
}

pub struct FakeSocket {
    pub params: ConnectParams,
    mode: JoinMode,
    connected: AtomicBool,
    disconnects: AtomicUsize,
    error_handlers: Mutex<Vec<SocketEventHandler>>,
    close_handlers: Mutex<Vec<SocketEventHandler>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeSocket {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_channel(&self) -> Arc<FakeChannel> {
        self.channels.lock().unwrap().last().cloned().expect("no channel created")
    }

    pub fn emit_error(&self, reason: &str) {
        let handlers = self.error_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(reason);
        }
    }

    pub fn emit_close(&self, reason: &str) {
        let handlers = self.close_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(reason);
        }
    }
}

impl Socket for FakeSocket {
    fn on_error(&self, handler: SocketEventHandler) {
        self.error_handlers.lock().unwrap().push(handler);
    }

    fn on_close(&self, handler: SocketEventHandler) {
        self.close_handlers.lock().unwrap().push(handler);
    }

    fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn channel(&self, topic: &str) -> Arc<dyn Channel> {
        let (gate_tx, gate_rx) = match self.mode {
            JoinMode::Held => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            JoinMode::Reply(_) => (None, None),
        };
        let reply = match &self.mode {
            JoinMode::Reply(reply) => Some(reply.clone()),
            JoinMode::Held => None,
        };
        let channel = Arc::new(FakeChannel {
            topic: topic.to_string(),
            reply,
            gate_tx: Mutex::new(gate_tx),
            gate_rx: Mutex::new(gate_rx),
            handlers: Mutex::new(Vec::new()),
            joins: AtomicUsize::new(0),
            leaves: AtomicUsize::new(0),
        });
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        channel
    }
}

pub struct FakeChannel {
    pub topic: String,
    reply: Option<JoinReply>,
    gate_tx: Mutex<Option<oneshot::Sender<JoinReply>>>,
    gate_rx: Mutex<Option<oneshot::Receiver<JoinReply>>>,
    handlers: Mutex<Vec<(String, MessageHandler)>>,
    joins: AtomicUsize,
    leaves: AtomicUsize,
}

impl FakeChannel {
    /// Answer a held join
    pub fn resolve_join(&self, reply: JoinReply) {
        let tx = self.gate_tx.lock().unwrap().take().expect("join not held");
        let _ = tx.send(reply);
    }

    /// Deliver a server push to the registered handlers
    pub fn push(&self, event: &str, payload: Value) {
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    pub fn push_update(&self, metadata: Value, updated_at_ms: i64) {
        self.push(
            "update",
            json!({"metadata": metadata, "updated_at": updated_at_ms}),
        );
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn on(&self, event: &str, handler: MessageHandler) {
        self.handlers
            .lock()
            .unwrap()
            .push((event.to_string(), handler));
    }

    async fn join(&self) -> JoinReply {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = &self.reply {
            return reply.clone();
        }
        let gate = self.gate_rx.lock().unwrap().take();
        match gate {
            Some(rx) => rx.await.unwrap_or(JoinReply::Timeout),
            None => JoinReply::Timeout,
        }
    }

    fn leave(&self) {
        self.leaves.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener wired to `transport` and a paused clock starting at [`BASE_MS`]
pub fn listener(transport: &Arc<FakeTransport>) -> (MetadataListener, Arc<PausedClock>) {
    let clock = Arc::new(PausedClock::new(BASE_MS));
    let listener = MetadataListener::builder("abc", "kexp")
        .transport(Arc::clone(transport) as Arc<dyn Transport>)
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .config(ListenerConfig::default())
        .build()
        .expect("valid listener");
    (listener, clock)
}

pub type Positions = Arc<Mutex<Vec<(i64, u64)>>>;
pub type Updates = Arc<Mutex<Vec<Option<MetadataMap>>>>;

pub fn record_positions(listener: &MetadataListener) -> Positions {
    let positions: Positions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&positions);
    listener.on_position(move |position, duration| {
        sink.lock().unwrap().push((position, duration));
    });
    positions
}

pub fn record_updates(listener: &MetadataListener) -> Updates {
    let updates: Updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    listener.on_update(move |metadata| {
        sink.lock().unwrap().push(metadata.cloned());
    });
    updates
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pmoradiokit=debug")
        .with_test_writer()
        .try_init();
}

//! Phoenix socket and channels over `tokio-tungstenite`.

use super::message::{
    self, Message, PHOENIX_TOPIC, PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_LEAVE, PHX_REPLY, VSN,
};
use crate::transport::{Channel, JoinReply, MessageHandler, Socket, SocketEventHandler};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use url::Url;

/// Build the WebSocket URL the Phoenix JS client would use for `endpoint`.
pub fn socket_url(endpoint: &str, access_token: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!("{}/websocket", endpoint.trim_end_matches('/')))?;
    url.query_pairs_mut()
        .append_pair("accessToken", access_token)
        .append_pair("vsn", VSN);
    Ok(url)
}

/// A Phoenix socket.
///
/// Pushes issued before the connection is open are queued and flushed once
/// it is.
pub struct PhoenixSocket {
    shared: Arc<SocketShared>,
}

struct SocketShared {
    url: Result<Url, String>,
    join_timeout: Duration,
    heartbeat_interval: Duration,
    next_ref: AtomicU64,
    shutdown: Notify,
    state: Mutex<SocketState>,
}

struct SocketState {
    outgoing_tx: mpsc::UnboundedSender<Message>,
    outgoing_rx: Option<mpsc::UnboundedReceiver<Message>>,
    channels: HashMap<String, Arc<ChannelShared>>,
    pending: HashMap<String, oneshot::Sender<Value>>,
    error_handlers: Vec<SocketEventHandler>,
    close_handlers: Vec<SocketEventHandler>,
    /// Ref of the last heartbeat still waiting for its reply
    heartbeat_ref: Option<String>,
    closed: bool,
}

impl PhoenixSocket {
    pub(crate) fn new(
        endpoint: &str,
        access_token: &str,
        join_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(SocketShared {
                url: socket_url(endpoint, access_token).map_err(|e| format!("{endpoint}: {e}")),
                join_timeout,
                heartbeat_interval,
                next_ref: AtomicU64::new(0),
                shutdown: Notify::new(),
                state: Mutex::new(SocketState {
                    outgoing_tx,
                    outgoing_rx: Some(outgoing_rx),
                    channels: HashMap::new(),
                    pending: HashMap::new(),
                    error_handlers: Vec::new(),
                    close_handlers: Vec::new(),
                    heartbeat_ref: None,
                    closed: false,
                }),
            }),
        }
    }
}

impl Socket for PhoenixSocket {
    fn on_error(&self, handler: SocketEventHandler) {
        self.shared.lock().error_handlers.push(handler);
    }

    fn on_close(&self, handler: SocketEventHandler) {
        self.shared.lock().close_handlers.push(handler);
    }

    fn connect(&self) {
        let url = match &self.shared.url {
            Ok(url) => url.clone(),
            Err(err) => {
                let reason = format!("invalid endpoint {err}");
                self.shared.fail(&reason);
                return;
            }
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                self.shared.fail(&format!("no tokio runtime: {err}"));
                return;
            }
        };

        let mut state = self.shared.lock();
        let Some(outgoing) = state.outgoing_rx.take() else {
            debug!("Socket already connected");
            return;
        };
        drop(state);
        runtime.spawn(run(Arc::clone(&self.shared), url, outgoing));
    }

    fn disconnect(&self) {
        let pending = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.channels.clear();
            std::mem::take(&mut state.pending)
        };
        for (_, reply) in pending {
            let _ = reply.send(message::error_reply("disconnected"));
        }
        self.shared.shutdown.notify_one();
        debug!("Socket disconnect requested");
    }

    fn channel(&self, topic: &str) -> Arc<dyn Channel> {
        let channel = Arc::new(ChannelShared {
            topic: topic.to_string(),
            handlers: Mutex::new(Vec::new()),
            join_ref: Mutex::new(None),
        });
        self.shared
            .lock()
            .channels
            .insert(topic.to_string(), Arc::clone(&channel));
        Arc::new(PhoenixChannel {
            socket: Arc::clone(&self.shared),
            channel,
        })
    }
}

impl Drop for PhoenixSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl SocketShared {
    fn lock(&self) -> MutexGuard<'_, SocketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn make_ref(&self) -> String {
        (self.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Next heartbeat to send, or `None` if the previous one was never answered
    fn next_heartbeat(&self) -> Option<Message> {
        let mut state = self.lock();
        if state.heartbeat_ref.is_some() {
            return None;
        }
        let msg_ref = self.make_ref();
        state.heartbeat_ref = Some(msg_ref.clone());
        Some(Message::heartbeat(msg_ref))
    }

    fn push(&self, msg: Message) {
        let state = self.lock();
        if state.closed {
            debug!(topic = %msg.topic, event = %msg.event, "Dropping push on closed socket");
            return;
        }
        let _ = state.outgoing_tx.send(msg);
    }

    /// Report a connection failure and fail every pending join
    fn fail(&self, reason: &str) {
        let (error_handlers, close_handlers, pending) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                state.error_handlers.clone(),
                state.close_handlers.clone(),
                std::mem::take(&mut state.pending),
            )
        };
        for handler in &error_handlers {
            handler(reason);
        }
        self.closed(close_handlers, pending, reason);
    }

    /// The connection ended without being asked to
    fn remote_closed(&self, reason: &str) {
        let (close_handlers, pending) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (state.close_handlers.clone(), std::mem::take(&mut state.pending))
        };
        self.closed(close_handlers, pending, reason);
    }

    fn closed(
        &self,
        close_handlers: Vec<SocketEventHandler>,
        pending: HashMap<String, oneshot::Sender<Value>>,
        reason: &str,
    ) {
        for (_, reply) in pending {
            let _ = reply.send(message::error_reply(reason));
        }
        for handler in &close_handlers {
            handler(reason);
        }
    }

    fn dispatch(&self, text: &str) {
        let msg = match Message::decode(text) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("Malformed Phoenix frame: {err}");
                return;
            }
        };

        if msg.event == PHX_REPLY {
            if msg.topic == PHOENIX_TOPIC {
                let mut state = self.lock();
                if msg.msg_ref.is_some() && state.heartbeat_ref == msg.msg_ref {
                    state.heartbeat_ref = None;
                }
                return;
            }
            let reply = msg
                .msg_ref
                .as_ref()
                .and_then(|msg_ref| self.lock().pending.remove(msg_ref));
            if let Some(reply) = reply {
                let _ = reply.send(msg.payload);
            }
            return;
        }

        if msg.event == PHX_ERROR || msg.event == PHX_CLOSE {
            warn!(topic = %msg.topic, event = %msg.event, "Channel reported by server");
        }

        let channel = self.lock().channels.get(&msg.topic).cloned();
        match channel {
            Some(channel) => channel.trigger(&msg.event, msg.payload),
            None => debug!(topic = %msg.topic, event = %msg.event, "Message for unknown topic"),
        }
    }
}

async fn run(shared: Arc<SocketShared>, url: Url, mut outgoing: mpsc::UnboundedReceiver<Message>) {
    debug!(host = url.host_str().unwrap_or_default(), "Connecting socket");

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = shared.shutdown.notified() => return,
    };
    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(err) => {
            shared.fail(&err.to_string());
            return;
        }
    };
    debug!("Socket open");

    let (mut write, mut read) = stream.split();
    let period = shared.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        // Queued pushes (a final phx_leave included) go out before shutdown.
        let outbound = tokio::select! {
            biased;
            msg = outgoing.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shared.shutdown.notified() => {
                let _ = write.send(WsMessage::Close(None)).await;
                break;
            }
            _ = heartbeat.tick() => match shared.next_heartbeat() {
                Some(msg) => msg,
                None => {
                    warn!("No reply to the last heartbeat, closing socket");
                    let _ = write.send(WsMessage::Close(None)).await;
                    shared.remote_closed("heartbeat timeout");
                    break;
                }
            },
            frame = read.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => shared.dispatch(text.as_str()),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        shared.remote_closed("closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        shared.fail(&err.to_string());
                        break;
                    }
                }
                continue;
            }
        };

        let text = match outbound.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!("Cannot encode Phoenix frame: {err}");
                continue;
            }
        };
        if let Err(err) = write.send(WsMessage::Text(text.into())).await {
            shared.fail(&err.to_string());
            break;
        }
    }

    debug!("Socket task finished");
}

struct ChannelShared {
    topic: String,
    handlers: Mutex<Vec<(String, MessageHandler)>>,
    join_ref: Mutex<Option<String>>,
}

impl ChannelShared {
    fn trigger(&self, event: &str, payload: Value) {
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(payload.clone());
        }
    }

    fn join_ref(&self) -> Option<String> {
        self.join_ref
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A topic on a [`PhoenixSocket`].
pub struct PhoenixChannel {
    socket: Arc<SocketShared>,
    channel: Arc<ChannelShared>,
}

#[async_trait]
impl Channel for PhoenixChannel {
    fn topic(&self) -> &str {
        &self.channel.topic
    }

    fn on(&self, event: &str, handler: MessageHandler) {
        self.channel
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), handler));
    }

    async fn join(&self) -> JoinReply {
        let msg_ref = self.socket.make_ref();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.socket.lock();
            if state.closed {
                return JoinReply::Error("socket closed".to_string());
            }
            state.pending.insert(msg_ref.clone(), tx);
        }
        *self
            .channel
            .join_ref
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(msg_ref.clone());

        self.socket.push(Message {
            join_ref: Some(msg_ref.clone()),
            msg_ref: Some(msg_ref.clone()),
            topic: self.channel.topic.clone(),
            event: PHX_JOIN.to_string(),
            payload: json!({}),
        });

        match tokio::time::timeout(self.socket.join_timeout, rx).await {
            Ok(Ok(payload)) => message::join_reply(&payload),
            Ok(Err(_)) => JoinReply::Error("socket closed".to_string()),
            Err(_) => {
                self.socket.lock().pending.remove(&msg_ref);
                JoinReply::Timeout
            }
        }
    }

    fn leave(&self) {
        self.socket.push(Message {
            join_ref: self.channel.join_ref(),
            msg_ref: Some(self.socket.make_ref()),
            topic: self.channel.topic.clone(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
        });

        let mut state = self.socket.lock();
        let registered = state
            .channels
            .get(&self.channel.topic)
            .is_some_and(|current| Arc::ptr_eq(current, &self.channel));
        if registered {
            state.channels.remove(&self.channel.topic);
        }
    }
}

//! Transport client for the venue's streaming API
//!
//! A single socket carries both one-shot requests and durable streams.
//! Requests are correlated by an integer `req_id`; stream frames are routed
//! through the [`SubscriptionRegistry`]. A supervisor task owns the read half
//! of the socket and handles reconnection with linear backoff.

use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::messages::InboundFrame;
use super::subscription::{Listener, Route, StreamKey, StreamKind, SubscriptionRegistry};
use crate::common::channels::create_status_channel;
use crate::common::errors::{ClientError, Result};
use crate::common::traits::Transport;
use crate::common::types::{ConnectionState, ConnectionStatus};
use crate::config::types::{ConnectionConfig, VenueConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reader = SplitStream<WsStream>;
type Writer = SplitSink<WsStream, Message>;

/// How long `close()` waits for the socket to wind down before forcing it
const CLOSE_GRACE: Duration = Duration::from_secs(5);

const KEEP_ALIVE_FRAME: &str = r#"{"ping":1}"#;

/// Transport tuning, resolved from [`ConnectionConfig`]
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub request_timeout: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub resubscribe_on_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for ConnectionSettings {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            reconnect_base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            resubscribe_on_reconnect: config.resubscribe_on_reconnect,
        }
    }
}

impl ConnectionSettings {
    /// Delay before reconnect attempt `attempt` (1-based), `None` once the budget is spent
    pub fn reconnect_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_reconnect_attempts {
            return None;
        }
        Some(self.reconnect_base_delay * attempt)
    }
}

struct Inner {
    url: Url,
    settings: ConnectionSettings,
    next_req_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Result<InboundFrame>>>,
    registry: Mutex<SubscriptionRegistry>,
    /// Sender feeding the write task of the live socket
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: broadcast::Sender<ConnectionStatus>,
    closing: AtomicBool,
    shutdown: Notify,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connect_lock: tokio::sync::Mutex<()>,
}

/// Persistent connection to the venue
///
/// Cheap to clone; every clone drives the same socket.
#[derive(Clone)]
pub struct VenueConnection {
    inner: Arc<Inner>,
}

impl VenueConnection {
    /// Create a client for `url`; nothing is opened until [`connect`](Self::connect)
    pub fn new(url: Url, settings: ConnectionSettings) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                url,
                settings,
                next_req_id: AtomicU64::new(1),
                pending: DashMap::new(),
                registry: Mutex::new(SubscriptionRegistry::new()),
                outbound: Mutex::new(None),
                state_tx,
                status_tx: create_status_channel(),
                closing: AtomicBool::new(false),
                shutdown: Notify::new(),
                supervisor: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Create a client from the venue and connection config sections
    pub fn from_config(venue: &VenueConfig, connection: &ConnectionConfig) -> Result<Self> {
        Ok(Self::new(venue.endpoint()?, ConnectionSettings::from(connection)))
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to connection status events
    pub fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Number of requests awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Keys of every locally registered stream
    pub fn active_streams(&self) -> Vec<StreamKey> {
        self.inner.registry.lock().keys()
    }

    /// Open the socket; no-op while already open or reconnecting
    #[instrument(skip(self), fields(url = %self.inner.url))]
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.connect_lock.lock().await;
        match self.state() {
            ConnectionState::Open | ConnectionState::Connecting => return Ok(()),
            ConnectionState::Closing => {
                return Err(ClientError::InvalidState(
                    "connection is closing".to_string(),
                ))
            }
            ConnectionState::Disconnected => {}
        }

        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);
        info!("Connecting to venue");

        match open(&self.inner).await {
            Ok(reader) => {
                let handle = tokio::spawn(supervise(self.inner.clone(), reader));
                *self.inner.supervisor.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
                self.inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Send a one-shot request and wait for the reply carrying the same `req_id`
    ///
    /// A reply with an `error` object resolves to [`ClientError::Venue`].
    pub async fn request(&self, mut frame: Value) -> Result<InboundFrame> {
        let req_id = self.inner.next_req_id();
        stamp(&mut frame, req_id)?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(req_id, tx);
        if let Err(e) = self.inner.send_value(&frame) {
            self.inner.pending.remove(&req_id);
            return Err(e);
        }
        debug!(req_id, "Request sent");

        match timeout(self.inner.settings.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.inner.pending.remove(&req_id);
                warn!(req_id, "Request timed out");
                Err(ClientError::Timeout { req_id })
            }
        }
    }

    /// Register `listener` for the stream `key`, sending `frame` if the stream is new
    ///
    /// A second listener on an active key joins it locally; the venue rejects
    /// duplicate stream requests, so nothing is sent.
    pub fn subscribe(&self, key: StreamKey, mut frame: Value, listener: Listener) -> Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(ClientError::Disconnected);
        }
        frame
            .as_object_mut()
            .ok_or_else(|| ClientError::InvalidRequest("frame must be a JSON object".to_string()))?
            .insert("subscribe".to_string(), json!(1));

        let mut registry = self.inner.registry.lock();
        if !registry.register(key.clone(), frame.clone(), listener) {
            debug!(stream = %key, "Joined existing stream");
            return Ok(());
        }

        let req_id = self.inner.next_req_id();
        stamp(&mut frame, req_id)?;
        registry.bind_request(req_id, &key);
        if let Err(e) = self.inner.send_value(&frame) {
            registry.remove(&key);
            return Err(e);
        }
        debug!(stream = %key, req_id, "Subscribed");
        Ok(())
    }

    /// Drop the stream `key` and forget it on the venue; idempotent
    pub fn unsubscribe(&self, key: &StreamKey) -> Result<()> {
        let Some(venue_ids) = self.inner.registry.lock().remove(key) else {
            return Ok(());
        };
        for id in venue_ids {
            if let Err(e) = self.inner.send_value(&json!({ "forget": id })) {
                debug!(stream = %key, "Could not send forget: {}", e);
            }
        }
        debug!(stream = %key, "Unsubscribed");
        Ok(())
    }

    /// Drop every stream of `kind` and ask the venue to forget them all
    pub fn forget_all(&self, kind: StreamKind) -> Result<()> {
        let removed = self.inner.registry.lock().remove_kind(kind);
        debug!(kind = %kind, streams = removed.len(), "Forgetting all streams");
        if self.state() == ConnectionState::Open {
            self.inner
                .send_value(&json!({ "forget_all": [kind.forget_all_name()] }))?;
        }
        Ok(())
    }

    /// Close the socket without reconnecting
    ///
    /// Pending requests fail with [`ClientError::ConnectionLost`] and every
    /// stream is dropped.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        if self.state() == ConnectionState::Disconnected {
            return Ok(());
        }
        info!("Closing connection");
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.shutdown.notify_waiters();
        self.inner.set_state(ConnectionState::Closing);
        if self.inner.send_message(Message::Close(None)).is_err() {
            debug!("No live socket to close");
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        let settled = timeout(CLOSE_GRACE, async {
            loop {
                let done = *state_rx.borrow_and_update() == ConnectionState::Disconnected;
                if done || state_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if settled.is_err() {
            warn!("Socket did not close in time, dropping it");
            if let Some(handle) = self.inner.supervisor.lock().take() {
                handle.abort();
            }
            self.inner.detach();
            self.inner.finish(Some("closed by client".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for VenueConnection {
    async fn request(&self, frame: Value) -> Result<InboundFrame> {
        VenueConnection::request(self, frame).await
    }

    fn subscribe(&self, key: StreamKey, frame: Value, listener: Listener) -> Result<()> {
        VenueConnection::subscribe(self, key, frame, listener)
    }

    fn unsubscribe(&self, key: &StreamKey) -> Result<()> {
        VenueConnection::unsubscribe(self, key)
    }

    fn forget_all(&self, kind: StreamKind) -> Result<()> {
        VenueConnection::forget_all(self, kind)
    }

    fn status_events(&self) -> broadcast::Receiver<ConnectionStatus> {
        VenueConnection::status_events(self)
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn publish(&self, status: ConnectionStatus) {
        // No receivers is fine
        let _ = self.status_tx.send(status);
    }

    fn next_req_id(&self) -> u64 {
        self.next_req_id.fetch_add(1, Ordering::SeqCst)
    }

    fn send_value(&self, frame: &Value) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.send_message(Message::Text(text))
    }

    fn send_message(&self, message: Message) -> Result<()> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(message).map_err(|_| ClientError::ConnectionLost),
            None => Err(ClientError::Disconnected),
        }
    }

    /// Detach from a dead socket: stop the writer and fail every pending request
    fn detach(&self) {
        self.outbound.lock().take();
        let in_flight: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for req_id in in_flight {
            if let Some((_, tx)) = self.pending.remove(&req_id) {
                let _ = tx.send(Err(ClientError::ConnectionLost));
            }
        }
    }

    /// Terminal teardown: drop every stream and report `Disconnected`
    fn finish(&self, reason: Option<String>) {
        let dropped = self.registry.lock().clear();
        if dropped > 0 {
            debug!(streams = dropped, "Dropped streams");
        }
        self.set_state(ConnectionState::Disconnected);
        self.publish(ConnectionStatus::Disconnected(reason));
    }

    fn dispatch(&self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {} - {}", e, text);
                return;
            }
        };

        if let Some(req_id) = frame.req_id {
            if let Some((_, tx)) = self.pending.remove(&req_id) {
                let _ = tx.send(frame.into_result());
                return;
            }
        }

        let route = self.registry.lock().route(&frame);
        match route {
            Route::Deliver { key, listeners } => {
                if let Some(err) = &frame.error {
                    warn!(stream = %key, "Stream ended by venue: {}", err);
                }
                for listener in &listeners {
                    listener(&frame);
                }
            }
            Route::Forget(id) => {
                debug!(id = %id, "Forgetting orphaned stream");
                if let Err(e) = self.send_value(&json!({ "forget": id })) {
                    debug!("Could not send forget: {}", e);
                }
            }
            Route::Unrouted => {
                debug!(msg_type = %frame.msg_type, req_id = ?frame.req_id, "Unrouted frame");
            }
        }
    }

    /// Re-issue or drop the registered streams after a reconnect
    fn restore_streams(&self) {
        if self.settings.resubscribe_on_reconnect {
            let mut registry = self.registry.lock();
            let frames = registry.prepare_resubscribe();
            let count = frames.len();
            for (key, mut frame) in frames {
                let req_id = self.next_req_id();
                if stamp(&mut frame, req_id).is_err() {
                    continue;
                }
                registry.bind_request(req_id, &key);
                if let Err(e) = self.send_value(&frame) {
                    warn!(stream = %key, "Failed to resubscribe: {}", e);
                }
            }
            drop(registry);
            if count > 0 {
                info!(streams = count, "Resubscribed streams");
                self.publish(ConnectionStatus::Resubscribed { streams: count });
            }
        } else {
            let count = self.registry.lock().clear();
            if count > 0 {
                warn!(streams = count, "Streams lost on reconnect");
                self.publish(ConnectionStatus::SubscriptionsLost { streams: count });
            }
        }
    }
}

fn stamp(frame: &mut Value, req_id: u64) -> Result<()> {
    match frame.as_object_mut() {
        Some(object) => {
            object.insert("req_id".to_string(), json!(req_id));
            Ok(())
        }
        None => Err(ClientError::InvalidRequest(
            "frame must be a JSON object".to_string(),
        )),
    }
}

/// Open a socket and start its write task
async fn open(inner: &Arc<Inner>) -> Result<Reader> {
    let (ws_stream, _response) = connect_async(inner.url.as_str())
        .await
        .map_err(|e| ClientError::WebSocketConnection(e.to_string()))?;
    info!("WebSocket connection established");

    let (writer, reader) = ws_stream.split();
    let (tx, rx) = mpsc::unbounded_channel();
    *inner.outbound.lock() = Some(tx);
    tokio::spawn(write_loop(writer, rx, inner.settings.heartbeat_interval));

    inner.set_state(ConnectionState::Open);
    inner.publish(ConnectionStatus::Connected);
    Ok(reader)
}

async fn write_loop(
    mut writer: Writer,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    heartbeat: Duration,
) {
    let mut keep_alive = interval_at(Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let is_close = matches!(message, Message::Close(_));
                if let Err(e) = writer.send(message).await {
                    warn!("Failed to write frame: {}", e);
                    break;
                }
                if is_close {
                    break;
                }
            }
            _ = keep_alive.tick() => {
                debug!("Sending keep-alive");
                if let Err(e) = writer.send(Message::Text(KEEP_ALIVE_FRAME.to_string())).await {
                    warn!("Failed to send keep-alive: {}", e);
                    break;
                }
            }
        }
    }
}

/// Drain the socket until it closes; returns the close reason if any
async fn read_loop(inner: &Inner, mut reader: Reader) -> Option<String> {
    while let Some(message) = reader.next().await {
        match message {
            Ok(Message::Text(text)) => inner.dispatch(&text),
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed: {:?}", frame);
                return frame.map(|f| f.reason.to_string());
            }
            Ok(Message::Binary(data)) => {
                debug!(bytes = data.len(), "Ignoring binary frame");
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                return Some(e.to_string());
            }
        }
    }
    None
}

/// Own the read half across reconnects until the connection is closed or gives up
async fn supervise(inner: Arc<Inner>, mut reader: Reader) {
    loop {
        let reason = read_loop(&inner, reader).await;
        inner.detach();

        if inner.closing.load(Ordering::SeqCst) {
            inner.finish(reason.or_else(|| Some("closed by client".to_string())));
            return;
        }

        let reason = reason.unwrap_or_else(|| "connection closed".to_string());
        warn!("Connection lost: {}", reason);
        inner.publish(ConnectionStatus::Error(reason));

        match reconnect(&inner).await {
            Some(next) => {
                inner.restore_streams();
                reader = next;
            }
            None if inner.closing.load(Ordering::SeqCst) => {
                inner.finish(Some("closed by client".to_string()));
                return;
            }
            None => {
                let attempts = inner.settings.max_reconnect_attempts;
                error!(attempts, "Giving up on reconnecting");
                inner.finish(Some(format!(
                    "gave up after {} reconnect attempts",
                    attempts
                )));
                return;
            }
        }
    }
}

async fn reconnect(inner: &Arc<Inner>) -> Option<Reader> {
    for attempt in 1..=inner.settings.max_reconnect_attempts {
        let delay = inner.settings.reconnect_delay(attempt)?;
        let shutdown = inner.shutdown.notified();
        tokio::pin!(shutdown);
        if inner.closing.load(Ordering::SeqCst) {
            return None;
        }

        inner.set_state(ConnectionState::Connecting);
        let delay_ms = delay.as_millis() as u64;
        info!(attempt, delay_ms, "Reconnecting");
        inner.publish(ConnectionStatus::Reconnecting { attempt, delay_ms });

        tokio::select! {
            _ = sleep(delay) => {}
            _ = &mut shutdown => return None,
        }

        match open(inner).await {
            Ok(reader) if inner.closing.load(Ordering::SeqCst) => {
                drop(reader);
                inner.detach();
                return None;
            }
            Ok(reader) => {
                info!(attempt, "Reconnected");
                return Some(reader);
            }
            Err(e) => warn!(attempt, "Reconnect attempt failed: {}", e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_is_linear_and_bounded() {
        let settings = ConnectionSettings::default();
        let delays: Vec<_> = (1..=5)
            .map(|attempt| settings.reconnect_delay(attempt).unwrap())
            .collect();
        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[4], Duration::from_secs(10));
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(settings.reconnect_delay(6), None);
        assert_eq!(settings.reconnect_delay(0), None);
    }

    #[test]
    fn test_stamp_requires_object() {
        let mut frame = json!({"ping": 1});
        stamp(&mut frame, 42).unwrap();
        assert_eq!(frame["req_id"], 42);

        let mut not_object = json!([1, 2]);
        assert!(matches!(
            stamp(&mut not_object, 1),
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_request_while_disconnected_fails_without_leak() {
        let connection = VenueConnection::new(
            Url::parse("ws://127.0.0.1:9").unwrap(),
            ConnectionSettings::default(),
        );
        let err = connection.request(json!({"ping": 1})).await.unwrap_err();
        assert!(matches!(err, ClientError::Disconnected));
        assert_eq!(connection.pending_count(), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_when_never_connected_is_noop() {
        let connection = VenueConnection::new(
            Url::parse("ws://127.0.0.1:9").unwrap(),
            ConnectionSettings::default(),
        );
        connection.close().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.unsubscribe(&StreamKey::balance()).is_ok());
    }
}

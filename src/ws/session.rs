//! Exchange WebSocket session with auto-reconnection and subscription
//! bookkeeping
//!
//! One `SessionManager` owns one socket. Three always-on tasks exist once
//! `start()` returns: the connection maintainer (connect, read frames,
//! reconnect on a fixed delay), the frame processor (decode, update caches,
//! enqueue for fan-out), and the callback processor (dispatch to
//! subscribers). The reconnect loop retries forever with a fixed delay; the
//! order monitor's give-up policy lives elsewhere and is deliberately
//! different.

use crate::config::SessionConfig;
use crate::tasks::TaskSupervisor;
use crate::ws::dispatch::{run_dispatcher, CallbackRegistry, EventCallback, SubscriptionKey};
use crate::ws::events::{decode_data, parse_raw, Channel, ControlMessage, RawMessage};
use crate::ws::state::{MarketCache, TickerSnapshot};
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid WebSocket URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("session is not running")]
    NotRunning,
}

/// Socket lifecycle states. Transitions never skip a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

fn valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;
    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Error)
            | (Connecting, Disconnected)
            | (Connected, Error)
            | (Connected, Disconnected)
            | (Error, Connecting)
            | (Error, Disconnected)
    )
}

/// Counters exposed to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceMetrics {
    pub message_count: u64,
    pub error_count: u64,
    pub reconnect_count: u64,
    pub queue_size: usize,
    pub connection_status: ConnectionState,
}

/// Process-level socket counts, sampled for observability around disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConnectionMetrics {
    pub established: usize,
    pub listening: usize,
    pub total: usize,
    pub sampled_at: DateTime<Utc>,
}

/// Count this process's view of TCP sockets. Linux-only; other platforms get
/// zeroed counts.
pub fn sample_network_connections() -> NetworkConnectionMetrics {
    let mut established = 0;
    let mut listening = 0;
    let mut total = 0;

    #[cfg(target_os = "linux")]
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines().skip(1) {
                // field 3 is the socket state in hex
                if let Some(state) = line.split_whitespace().nth(3) {
                    total += 1;
                    match state {
                        "01" => established += 1,
                        "0A" => listening += 1,
                        _ => {}
                    }
                }
            }
        }
    }

    NetworkConnectionMetrics {
        established,
        listening,
        total,
        sampled_at: Utc::now(),
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

struct SessionInner {
    config: SessionConfig,
    cache: Arc<MarketCache>,
    registry: Arc<CallbackRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    running: AtomicBool,
    had_connected: AtomicBool,
    writer: Mutex<Option<WsSink>>,
    active_subs: Mutex<HashSet<SubscriptionKey>>,
    frame_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    frame_depth: AtomicUsize,
    callback_depth: Arc<AtomicUsize>,
    message_count: AtomicU64,
    error_count: AtomicU64,
    reconnect_count: AtomicU64,
}

impl SessionInner {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state();
        if from == to {
            return;
        }
        if !valid_transition(from, to) {
            warn!(%from, %to, "refusing invalid connection state transition");
            return;
        }
        debug!(%from, %to, "connection state changed");
        let _ = self.state_tx.send(to);
    }

    /// Block until the socket is connected, or fail once the session stops.
    async fn await_connected(&self) -> Result<(), WsError> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            if *state_rx.borrow() == ConnectionState::Connected {
                return Ok(());
            }
            if !self.is_running() {
                return Err(WsError::NotRunning);
            }
            if state_rx.changed().await.is_err() {
                return Err(WsError::NotRunning);
            }
        }
    }

    /// Re-send a subscribe frame for every key in the active set. Called
    /// right after a (re)connect; callbacks are instance state and are not
    /// re-registered.
    async fn resubscribe(&self) {
        let keys: Vec<SubscriptionKey> = {
            let subs = self.active_subs.lock().await;
            subs.iter().cloned().collect()
        };
        if keys.is_empty() {
            return;
        }
        info!(count = keys.len(), "resubscribing active channels");
        for key in keys {
            match serde_json::to_string(&key.subscribe_frame()) {
                Ok(frame) => {
                    if let Err(err) = self.send_text(&frame).await {
                        warn!(%err, channel = %key.channel, "resubscribe frame failed to send");
                    }
                }
                Err(err) => error!(%err, "failed to serialize subscribe frame"),
            }
        }
    }

    async fn send_text(&self, text: &str) -> Result<(), WsError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => {
                sink.send(Message::Text(text.to_string().into())).await?;
                Ok(())
            }
            None => Err(WsError::NotRunning),
        }
    }
}

/// Owns the single socket to the exchange and everything attached to it.
pub struct SessionManager {
    inner: Arc<SessionInner>,
    supervisor: TaskSupervisor,
    core_tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = SessionInner {
            config,
            cache: Arc::new(MarketCache::new()),
            registry: Arc::new(CallbackRegistry::new()),
            state_tx,
            running: AtomicBool::new(false),
            had_connected: AtomicBool::new(false),
            writer: Mutex::new(None),
            active_subs: Mutex::new(HashSet::new()),
            frame_tx: Mutex::new(None),
            frame_depth: AtomicUsize::new(0),
            callback_depth: Arc::new(AtomicUsize::new(0)),
            message_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            reconnect_count: AtomicU64::new(0),
        };
        Self {
            inner: Arc::new(inner),
            supervisor: TaskSupervisor::new(),
            core_tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Shared market caches (ticker / book / trades).
    pub fn cache(&self) -> Arc<MarketCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Supervisor for ad-hoc background tasks tied to this session's
    /// lifetime; `close()` cancels everything registered here.
    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Start the session: spawn the three core tasks, block until the first
    /// successful connection, issue the default subscriptions, and wait —
    /// bounded — for the first real ticker. Idempotent: a second call logs
    /// and returns.
    pub async fn start(&self) -> Result<(), WsError> {
        let endpoint = url::Url::parse(&self.inner.config.ws_url)?;

        if self.started.swap(true, Ordering::SeqCst) {
            info!("session already started, ignoring start()");
            return Ok(());
        }

        info!(
            scheme = endpoint.scheme(),
            host = endpoint.host_str().unwrap_or(""),
            "starting exchange session"
        );
        self.inner.running.store(true, Ordering::SeqCst);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(self.inner.config.callback_queue_capacity);
        *self.inner.frame_tx.lock().await = Some(frame_tx);

        let mut tasks = self.core_tasks.lock().await;
        tasks.push(tokio::spawn(process_frames(
            Arc::clone(&self.inner),
            frame_rx,
            event_tx,
        )));
        tasks.push(tokio::spawn(run_dispatcher(
            event_rx,
            Arc::clone(&self.inner.registry),
            Arc::clone(&self.inner.callback_depth),
        )));
        tasks.push(tokio::spawn(maintain_connection(Arc::clone(&self.inner))));
        drop(tasks);

        self.inner.await_connected().await?;

        for key in self.inner.config.default_subscriptions.clone() {
            self.subscribe_key(key, None).await?;
        }

        if !self.inner.config.default_subscriptions.is_empty() {
            self.wait_for_first_ticker().await;
        }

        Ok(())
    }

    /// Poll the cache until some pair reports non-zero ask/bid/close, or log
    /// (not raise) on timeout.
    async fn wait_for_first_ticker(&self) {
        let cache = Arc::clone(&self.inner.cache);
        let wait = async {
            while !cache.any_ticker_ready() {
                sleep(Duration::from_millis(100)).await;
            }
        };
        match timeout(self.inner.config.ticker_wait_timeout, wait).await {
            Ok(()) => info!("first ticker data received"),
            Err(_) => warn!(
                timeout = ?self.inner.config.ticker_wait_timeout,
                "timed out waiting for first ticker data; continuing"
            ),
        }
    }

    /// Stop the maintainer, cancel the core tasks and everything in the
    /// supervisor, close the socket, and account for anything left in the
    /// queues.
    pub async fn close(&self) {
        info!("closing exchange session");
        self.inner.running.store(false, Ordering::SeqCst);

        let mut tasks = self.core_tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        drop(tasks);
        self.supervisor.cancel_all().await;

        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }

        let undrained_frames = self.inner.frame_depth.swap(0, Ordering::SeqCst);
        let undrained_events = self.inner.callback_depth.swap(0, Ordering::SeqCst);
        if undrained_frames > 0 || undrained_events > 0 {
            warn!(
                frames = undrained_frames,
                events = undrained_events,
                "queues were non-empty at close"
            );
        }
        *self.inner.frame_tx.lock().await = None;

        self.inner.transition(ConnectionState::Disconnected);
        self.started.store(false, Ordering::SeqCst);
        info!("exchange session closed");
    }

    /// Subscribe to a channel for the given pairs, optionally registering a
    /// callback for decoded events.
    pub async fn subscribe(
        &self,
        channel: Channel,
        pairs: Vec<String>,
        callback: Option<EventCallback>,
    ) -> Result<(), WsError> {
        self.subscribe_key(SubscriptionKey::new(channel, pairs, None), callback)
            .await
    }

    /// Subscribe with an explicit depth/interval detail.
    ///
    /// Awaits a connection first, then sends only if still connected at send
    /// time. If the connection drops in that window the subscription is lost
    /// apart from a warning and the key is not added to the active set —
    /// a known race kept as-is.
    pub async fn subscribe_key(
        &self,
        key: SubscriptionKey,
        callback: Option<EventCallback>,
    ) -> Result<(), WsError> {
        self.inner.await_connected().await?;

        if let Some(callback) = callback {
            self.inner.registry.register(key.clone(), callback).await;
        }

        let frame = serde_json::to_string(&key.subscribe_frame())?;
        let mut writer = self.inner.writer.lock().await;
        let still_connected = self.inner.state() == ConnectionState::Connected;
        match writer.as_mut() {
            Some(sink) if still_connected => match sink.send(Message::Text(frame.into())).await {
                Ok(()) => {
                    drop(writer);
                    self.inner.active_subs.lock().await.insert(key.clone());
                    info!(channel = %key.channel, pairs = ?key.pairs, "subscribed");
                }
                Err(err) => {
                    warn!(
                        %err,
                        channel = %key.channel,
                        "connection dropped while sending subscribe frame; subscription lost"
                    );
                }
            },
            _ => {
                warn!(
                    channel = %key.channel,
                    "connection lost before subscribe frame could be sent; subscription lost"
                );
            }
        }
        Ok(())
    }

    /// Remove a subscription: the key leaves the resubscription set and its
    /// callbacks are dropped; an unsubscribe frame is sent when connected.
    pub async fn unsubscribe(&self, channel: Channel, pairs: Vec<String>) -> Result<(), WsError> {
        self.unsubscribe_key(SubscriptionKey::new(channel, pairs, None))
            .await
    }

    pub async fn unsubscribe_key(&self, key: SubscriptionKey) -> Result<(), WsError> {
        let was_active = self.inner.active_subs.lock().await.remove(&key);
        self.inner.registry.remove(&key).await;
        if !was_active {
            debug!(channel = %key.channel, "unsubscribe for inactive key");
            return Ok(());
        }

        let frame = serde_json::to_string(&key.unsubscribe_frame())?;
        let mut writer = self.inner.writer.lock().await;
        let still_connected = self.inner.state() == ConnectionState::Connected;
        match writer.as_mut() {
            Some(sink) if still_connected => match sink.send(Message::Text(frame.into())).await {
                Ok(()) => info!(channel = %key.channel, pairs = ?key.pairs, "unsubscribed"),
                Err(err) => warn!(%err, "connection dropped while sending unsubscribe frame"),
            },
            _ => {
                warn!(channel = %key.channel, "not connected; unsubscribe frame not sent");
            }
        }
        Ok(())
    }

    /// Keys currently slated for resubscription after a reconnect.
    pub async fn active_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.inner.active_subs.lock().await.iter().cloned().collect()
    }

    /// Ticker snapshots for the requested pairs (or every tracked pair).
    /// Defensive: unknown pairs get zeroed `Initializing` snapshots, and a
    /// disconnected socket yields defaults plus a warning — never an error.
    pub fn get_ticker_data(&self, pairs: Option<&[String]>) -> HashMap<String, TickerSnapshot> {
        let requested: Vec<String> = match pairs {
            Some(pairs) => pairs.to_vec(),
            None => self.inner.cache.tracked_pairs(),
        };

        if self.inner.state() != ConnectionState::Connected {
            warn!(
                state = %self.inner.state(),
                "ticker data requested while not connected; returning defaults"
            );
            return requested
                .into_iter()
                .map(|pair| (pair, TickerSnapshot::default()))
                .collect();
        }

        requested
            .into_iter()
            .map(|pair| {
                let snapshot = self.inner.cache.ticker_or_default(&pair);
                (pair, snapshot)
            })
            .collect()
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            message_count: self.inner.message_count.load(Ordering::Relaxed),
            error_count: self.inner.error_count.load(Ordering::Relaxed),
            reconnect_count: self.inner.reconnect_count.load(Ordering::Relaxed),
            queue_size: self.inner.frame_depth.load(Ordering::Relaxed),
            connection_status: self.inner.state(),
        }
    }

    pub fn get_network_connection_metrics(&self) -> NetworkConnectionMetrics {
        sample_network_connections()
    }
}

/// Connection maintainer: connect, read frames onto the queue, and on any
/// socket failure retry after a fixed delay — forever, while running. No
/// attempt cap and no backoff growth, by design.
async fn maintain_connection(inner: Arc<SessionInner>) {
    while inner.is_running() {
        inner.transition(ConnectionState::Connecting);

        let attempt = timeout(
            inner.config.call_timeout,
            connect_async(inner.config.ws_url.as_str()),
        )
        .await;

        match attempt {
            Ok(Ok((stream, response))) => {
                info!(status = ?response.status(), "WebSocket connected");
                let (sink, mut read) = stream.split();
                *inner.writer.lock().await = Some(sink);

                if inner.had_connected.swap(true, Ordering::SeqCst) {
                    inner.reconnect_count.fetch_add(1, Ordering::Relaxed);
                }
                inner.transition(ConnectionState::Connected);
                inner.resubscribe().await;

                let frame_tx = inner.frame_tx.lock().await.clone();
                let Some(frame_tx) = frame_tx else {
                    warn!("frame queue missing; maintainer exiting");
                    return;
                };

                while inner.is_running() {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            inner.message_count.fetch_add(1, Ordering::Relaxed);
                            inner.frame_depth.fetch_add(1, Ordering::Relaxed);
                            if frame_tx.send(text.to_string()).is_err() {
                                error!("frame queue closed; maintainer exiting");
                                return;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Some(sink) = inner.writer.lock().await.as_mut() {
                                let _ = sink.send(Message::Pong(payload)).await;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!(?frame, "socket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            error!(%err, "socket read error");
                            inner.error_count.fetch_add(1, Ordering::Relaxed);
                            break;
                        }
                        None => {
                            warn!("socket stream ended");
                            break;
                        }
                    }
                }

                inner.writer.lock().await.take();
                if !inner.is_running() {
                    break;
                }

                let net = sample_network_connections();
                warn!(
                    established = net.established,
                    total_sockets = net.total,
                    "connection lost; sampled process network state"
                );
                inner.transition(ConnectionState::Error);
            }
            Ok(Err(err)) => {
                error!(%err, url = %inner.config.ws_url, "connection attempt failed");
                inner.error_count.fetch_add(1, Ordering::Relaxed);
                inner.transition(ConnectionState::Error);
            }
            Err(_) => {
                error!(
                    timeout = ?inner.config.call_timeout,
                    "connection attempt timed out"
                );
                inner.error_count.fetch_add(1, Ordering::Relaxed);
                inner.transition(ConnectionState::Error);
            }
        }

        if !inner.is_running() {
            break;
        }
        debug!(delay = ?inner.config.reconnect_delay, "reconnecting after fixed delay");
        sleep(inner.config.reconnect_delay).await;
    }
    debug!("connection maintainer stopped");
}

/// Frame processor: single consumer of the raw frame queue, guaranteeing
/// in-order per-pair cache updates. Decoded events are forwarded onto the
/// bounded callback channel (blocking when it is full).
async fn process_frames(
    inner: Arc<SessionInner>,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<crate::ws::events::MarketEvent>,
) {
    debug!("frame processor started");
    while let Some(text) = frame_rx.recv().await {
        let _ = inner
            .frame_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |depth| {
                Some(depth.saturating_sub(1))
            });

        match parse_raw(&text) {
            Ok(RawMessage::Control(control)) => {
                if let ControlMessage::SubscriptionStatus {
                    status,
                    error_message: Some(err),
                    ..
                } = &control
                {
                    warn!(?status, %err, "subscription rejected by exchange");
                } else {
                    trace!(?control, "control message acknowledged");
                }
            }
            Ok(RawMessage::Data(frame)) => match decode_data(frame) {
                Ok(event) => {
                    inner.cache.apply(&event).await;
                    inner.callback_depth.fetch_add(1, Ordering::Relaxed);
                    if event_tx.send(event).await.is_err() {
                        error!("callback queue closed; frame processor exiting");
                        return;
                    }
                }
                Err(err) => {
                    warn!(%err, "dropping malformed data frame");
                    inner.error_count.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(err) => {
                warn!(%err, "dropping undecodable frame");
                inner.error_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    debug!("frame processor stopped");
}

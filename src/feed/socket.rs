//! Generic WebSocket feed client: one transport, one state machine, shared
//! by every symbol subscribed through it

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};
use tracing::{debug, error, info, warn};

use crate::candles::Tick;
use crate::metrics::FeedMetrics;

use super::retry::{ReconnectConfig, ScheduledTask};
use super::router::{HandlerToken, TickRouter};
use super::{CloseKind, ConnectionState, FeedError, Inbound, ProviderProtocol};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Callback invoked whenever the transport (re)opens
pub type ConnectHandler = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked for every reported feed error
pub type ErrorHandler = Arc<dyn Fn(&FeedError) + Send + Sync>;

/// Streaming price client for one provider.
///
/// Owns a persistent connection, the tracked symbol set, and the
/// reconnection state machine; decoded ticks are fanned out through the
/// embedded [`TickRouter`]. Provider specifics live entirely in the
/// [`ProviderProtocol`] strategy, so each provider is just an instantiation
/// of this type. Instances are explicit values, constructed by the
/// composition root; there is no process-wide singleton.
pub struct FeedClient<P: ProviderProtocol> {
    inner: Arc<FeedInner<P>>,
}

impl<P: ProviderProtocol> Clone for FeedClient<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct FeedInner<P: ProviderProtocol> {
    protocol: P,
    reconnect: ReconnectConfig,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    router: TickRouter,
    metrics: Arc<FeedMetrics>,
    symbols: StdMutex<BTreeSet<String>>,
    connect_handlers: StdMutex<Vec<ConnectHandler>>,
    error_handlers: StdMutex<Vec<ErrorHandler>>,
    /// Reconnect attempt counter; pinned to the cap by `disconnect` so a
    /// pending timer that already fired stands down
    attempt: AtomicU32,
    closing: AtomicBool,
    cooldown_until: StdMutex<Option<Instant>>,
    sink: Mutex<Option<WsSink>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    heartbeat: StdMutex<Option<ScheduledTask>>,
    pending_reconnect: StdMutex<Option<ScheduledTask>>,
}

impl<P: ProviderProtocol> FeedClient<P> {
    /// Create a disconnected client for the given provider protocol
    pub fn new(protocol: P, reconnect: ReconnectConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(FeedInner {
                protocol,
                reconnect,
                state_tx,
                state_rx,
                router: TickRouter::new(),
                metrics: Arc::new(FeedMetrics::new()),
                symbols: StdMutex::new(BTreeSet::new()),
                connect_handlers: StdMutex::new(Vec::new()),
                error_handlers: StdMutex::new(Vec::new()),
                attempt: AtomicU32::new(0),
                closing: AtomicBool::new(false),
                cooldown_until: StdMutex::new(None),
                sink: Mutex::new(None),
                reader: StdMutex::new(None),
                heartbeat: StdMutex::new(None),
                pending_reconnect: StdMutex::new(None),
            }),
        }
    }

    /// Open the transport and subscribe to the given symbol set.
    ///
    /// Calling while already `Open` or `Connecting` is a no-op. During a
    /// rate-limit cooldown this fails fast with the remaining wait instead
    /// of touching the network; once the cooldown has expired the retry
    /// counter is reset and the connection proceeds normally.
    pub async fn connect(&self, symbols: Vec<String>) -> Result<(), FeedError> {
        match self.inner.state() {
            ConnectionState::Open | ConnectionState::Connecting => {
                debug!("{} already connected, connect is a no-op", self.inner.protocol.name());
                return Ok(());
            }
            _ => {}
        }
        self.inner.cooldown_check()?;

        // A fresh connect supersedes any scheduled retry
        *self.inner.pending_reconnect.lock().unwrap() = None;
        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.attempt.store(0, Ordering::SeqCst);
        {
            let mut tracked = self.inner.symbols.lock().unwrap();
            tracked.clear();
            tracked.extend(symbols);
        }
        Arc::clone(&self.inner).open_transport().await
    }

    /// Close the connection and drop all subscriptions. Unsubscribe frames
    /// are sent best-effort; this is the only cancellation primitive.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        info!("{} disconnecting", inner.protocol.name());
        inner.closing.store(true, Ordering::SeqCst);
        inner.attempt.store(inner.reconnect.max_attempts, Ordering::SeqCst);
        *inner.pending_reconnect.lock().unwrap() = None;
        inner.stop_heartbeat();

        if inner.state() == ConnectionState::Open {
            let symbols: Vec<String> = inner.symbols.lock().unwrap().iter().cloned().collect();
            for frame in inner.protocol.unsubscribe_frames(&symbols) {
                if let Err(e) = inner.send_text(&frame).await {
                    debug!("best-effort unsubscribe failed: {}", e);
                }
            }
        }

        inner.drop_sink().await;
        if let Some(handle) = inner.reader.lock().unwrap().take() {
            handle.abort();
        }
        inner.router.clear();
        inner.symbols.lock().unwrap().clear();
        inner.set_state(ConnectionState::Closed);
    }

    /// Register a tick handler for one symbol; the returned token removes
    /// exactly that handler
    pub fn on_price_update(
        &self,
        symbol: &str,
        handler: impl Fn(&Tick) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.inner.router.on_tick(symbol, Arc::new(handler))
    }

    /// Remove a handler previously registered with [`Self::on_price_update`]
    pub fn remove_handler(&self, token: &HandlerToken) -> bool {
        self.inner.router.remove(token)
    }

    /// Register a callback invoked every time the transport (re)opens
    pub fn on_connect(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner
            .connect_handlers
            .lock()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Register a callback for reported feed errors
    pub fn on_error(&self, handler: impl Fn(&FeedError) + Send + Sync + 'static) {
        self.inner
            .error_handlers
            .lock()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Start tracking one more symbol. While `Open` this subscribes
    /// incrementally instead of reopening the connection.
    pub async fn add_symbol(&self, symbol: &str) -> Result<(), FeedError> {
        let inserted = self.inner.symbols.lock().unwrap().insert(symbol.to_string());
        if inserted && self.inner.state() == ConnectionState::Open {
            for frame in self.inner.protocol.subscribe_frames(&[symbol.to_string()]) {
                self.inner.send_text(&frame).await?;
            }
        }
        Ok(())
    }

    /// Stop tracking a symbol: unsubscribe at the provider and drop its
    /// routing entry
    pub async fn remove_symbol(&self, symbol: &str) -> Result<(), FeedError> {
        let removed = self.inner.symbols.lock().unwrap().remove(symbol);
        if removed && self.inner.state() == ConnectionState::Open {
            for frame in self.inner.protocol.unsubscribe_frames(&[symbol.to_string()]) {
                self.inner.send_text(&frame).await?;
            }
        }
        self.inner.router.remove_symbol(symbol);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch channel mirroring every state transition, for UIs that render
    /// connection status
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Open
    }

    pub fn metrics(&self) -> Arc<FeedMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Symbols currently tracked by this client
    pub fn symbols(&self) -> Vec<String> {
        self.inner.symbols.lock().unwrap().iter().cloned().collect()
    }
}

impl<P: ProviderProtocol> FeedInner<P> {
    fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("{} state {:?} -> {:?}", self.protocol.name(), previous, state);
        }
    }

    fn notify_connect(&self) {
        let handlers: Vec<ConnectHandler> = self.connect_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler();
        }
    }

    fn notify_error(&self, err: &FeedError) {
        let handlers: Vec<ErrorHandler> = self.error_handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(err);
        }
    }

    /// Fail fast while a rate-limit cooldown is active; reset the retry
    /// counter once it has expired
    fn cooldown_check(&self) -> Result<(), FeedError> {
        let mut until = self.cooldown_until.lock().unwrap();
        if let Some(deadline) = *until {
            let now = Instant::now();
            if now < deadline {
                return Err(FeedError::RateLimited {
                    remaining_secs: (deadline - now).as_secs().max(1),
                });
            }
            *until = None;
            self.attempt.store(0, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn open_transport(self: Arc<Self>) -> Result<(), FeedError> {
        self.set_state(ConnectionState::Connecting);
        let url = self.protocol.connect_url();

        match connect_async(&url).await {
            Ok((stream, _response)) => {
                let (sink, source) = stream.split();
                *self.sink.lock().await = Some(sink);
                self.attempt.store(0, Ordering::SeqCst);
                *self.cooldown_until.lock().unwrap() = None;
                self.set_state(ConnectionState::Open);
                info!("{} connected", self.protocol.name());

                let symbols: Vec<String> = self.symbols.lock().unwrap().iter().cloned().collect();
                for frame in self.protocol.subscribe_frames(&symbols) {
                    self.send_text(&frame).await?;
                }

                Arc::clone(&self).start_heartbeat();
                Arc::clone(&self).spawn_reader(source);
                self.notify_connect();
                Ok(())
            }
            Err(e) => {
                error!("{} connect failed: {}", self.protocol.name(), e);
                let err = FeedError::Connection(format!(
                    "failed to reach {}: {}",
                    self.protocol.name(),
                    e
                ));
                Arc::clone(&self).handle_transport_loss(&e.to_string()).await;
                Err(err)
            }
        }
    }

    fn spawn_reader(self: Arc<Self>, mut source: WsSource) {
        let inner = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            loop {
                let Some(item) = source.next().await else {
                    Arc::clone(&inner)
                        .on_transport_close(None, "connection closed by peer".to_string())
                        .await;
                    break;
                };
                match item {
                    Ok(Message::Text(text)) => inner.handle_frame(&text).await,
                    Ok(Message::Ping(payload)) => {
                        let _ = inner.send_message(Message::Pong(payload)).await;
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        Arc::clone(&inner).on_transport_close(code, reason).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        Arc::clone(&inner).on_transport_close(None, e.to_string()).await;
                        break;
                    }
                }
            }
        });
        *self.reader.lock().unwrap() = Some(handle);
    }

    /// Runs on the read path: decode, dispatch, answer keep-alives. Must
    /// not block.
    async fn handle_frame(&self, text: &str) {
        match self.protocol.decode(text) {
            Ok(Inbound::Ticks(ticks)) => {
                for tick in &ticks {
                    self.metrics.record_tick();
                    self.router.dispatch(tick);
                }
            }
            Ok(Inbound::Ping) => {
                if let Some(reply) = self.protocol.ping_reply() {
                    if let Err(e) = self.send_text(&reply).await {
                        warn!("{} failed to answer ping: {}", self.protocol.name(), e);
                    }
                }
            }
            Ok(Inbound::Ack) => {
                debug!("{} acknowledged a control frame", self.protocol.name());
            }
            Ok(Inbound::Ignored) => {}
            Err(err) => {
                // One bad frame is dropped without touching connection state
                self.metrics.record_malformed();
                warn!("{}: {}", self.protocol.name(), err);
                self.notify_error(&err);
            }
        }
    }

    async fn on_transport_close(self: Arc<Self>, code: Option<u16>, reason: String) {
        if self.closing.load(Ordering::SeqCst) {
            debug!("{} transport closed during shutdown", self.protocol.name());
            return;
        }
        let kind = self.protocol.classify_close(code, &reason);
        info!(
            "{} transport closed: kind {:?}, code {:?}, reason '{}'",
            self.protocol.name(),
            kind,
            code,
            reason
        );
        self.handle_close(kind, &reason).await;
    }

    async fn handle_close(self: Arc<Self>, kind: CloseKind, detail: &str) {
        self.stop_heartbeat();
        self.drop_sink().await;

        match kind {
            CloseKind::Clean => {
                self.set_state(ConnectionState::Closed);
            }
            CloseKind::Authentication => {
                self.set_state(ConnectionState::Closed);
                let msg = if detail.is_empty() {
                    "provider rejected the API token".to_string()
                } else {
                    detail.to_string()
                };
                self.notify_error(&FeedError::Authentication(msg));
            }
            CloseKind::RateLimited => {
                let cooldown = self.reconnect.cooldown();
                *self.cooldown_until.lock().unwrap() = Some(Instant::now() + cooldown);
                self.set_state(ConnectionState::RateLimited);
                self.notify_error(&FeedError::RateLimited {
                    remaining_secs: cooldown.as_secs(),
                });
            }
            CloseKind::Abnormal => {
                self.handle_transport_loss(detail).await;
            }
        }
    }

    // Returns a boxed `Send` future rather than an `async fn` so that this
    // node has a concrete (non-opaque) type in the open_transport ->
    // handle_transport_loss -> ScheduledTask::once -> retry_connect ->
    // open_transport recursion cycle. Without it, auto-trait `Send`
    // inference over the mutually recursive futures cannot converge and the
    // scheduled reconnect future is rejected as non-`Send`. The body is
    // synchronous; nothing is awaited here.
    fn handle_transport_loss(
        self: Arc<Self>,
        detail: &str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        let detail = detail.to_string();
        Box::pin(async move {
            let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.reconnect.max_attempts {
                self.set_state(ConnectionState::Closed);
                *self.pending_reconnect.lock().unwrap() = None;
                self.notify_error(&FeedError::RetriesExhausted {
                    attempts: self.reconnect.max_attempts,
                    last: detail.clone(),
                });
                return;
            }

            self.metrics.record_reconnect();
            self.set_state(ConnectionState::Reconnecting);
            self.notify_error(&FeedError::Connection(if detail.is_empty() {
                "connection lost".to_string()
            } else {
                detail.clone()
            }));

            let delay = self.reconnect.delay_for(attempt);
            warn!(
                "{} reconnect attempt {}/{} in {:?}",
                self.protocol.name(),
                attempt,
                self.reconnect.max_attempts,
                delay
            );
            let inner = Arc::clone(&self);
            let task = ScheduledTask::once(delay, async move {
                inner.retry_connect().await;
            });
            *self.pending_reconnect.lock().unwrap() = Some(task);
        })
    }

    async fn retry_connect(self: Arc<Self>) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        if self.state() != ConnectionState::Reconnecting {
            debug!("{} scheduled reconnect superseded", self.protocol.name());
            return;
        }
        if let Err(e) = Arc::clone(&self).open_transport().await {
            debug!("{} reconnect attempt failed: {}", self.protocol.name(), e);
        }
    }

    fn start_heartbeat(self: Arc<Self>) {
        let Some(heartbeat) = self.protocol.heartbeat() else {
            return;
        };
        debug!(
            "{} starting {}s heartbeat",
            self.protocol.name(),
            heartbeat.interval.as_secs()
        );
        let inner = Arc::clone(&self);
        let task = ScheduledTask::repeating(heartbeat.interval, move || {
            let inner = Arc::clone(&inner);
            let frame = heartbeat.frame.clone();
            async move {
                if let Err(e) = inner.send_text(&frame).await {
                    debug!("{} heartbeat send failed: {}", inner.protocol.name(), e);
                }
            }
        });
        *self.heartbeat.lock().unwrap() = Some(task);
    }

    fn stop_heartbeat(&self) {
        *self.heartbeat.lock().unwrap() = None;
    }

    async fn drop_sink(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    async fn send_text(&self, frame: &str) -> Result<(), FeedError> {
        self.send_message(Message::Text(frame.to_string())).await
    }

    async fn send_message(&self, message: Message) -> Result<(), FeedError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(message)
                .await
                .map_err(|e| FeedError::Connection(format!("send failed: {}", e))),
            None => Err(FeedError::Connection("transport not connected".to_string())),
        }
    }
}

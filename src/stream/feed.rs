use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::utils::lock_unpoisoned;

use super::frames::{self, Inbound};
use super::{ConnectionState, PriceListeners, PriceUpdate};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Write half of the socket, tagged with the session that opened it.
struct Writer {
    session: u64,
    sink: WsSink,
}

struct Session {
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

/// Result of an in-flight connect, shared with `start` calls that arrive
/// while it is still pending.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectStatus {
    Pending,
    Open,
    Failed(String),
}

struct FeedState {
    connection: ConnectionState,
    subscriptions: HashSet<String>,
    /// Bumped on every Disconnected -> Connecting transition.
    session_id: u64,
    session: Option<Session>,
    pending_connect: Option<watch::Receiver<ConnectStatus>>,
}

struct FeedShared {
    config: StreamConfig,
    scope: CancellationToken,
    state: Mutex<FeedState>,
    /// Serializes every outbound frame.
    writer: tokio::sync::Mutex<Option<Writer>>,
    listeners: PriceListeners,
}

enum StartPlan {
    Nothing,
    Incremental(Vec<String>),
    Connect(u64, watch::Sender<ConnectStatus>),
    Join(watch::Receiver<ConnectStatus>),
    Closing,
}

/// Ticker prices for a changing set of symbols over one websocket.
///
/// A feed is `Disconnected` until [`StreamingFeed::start`] connects it. While
/// `Open`, further `start` calls only subscribe symbols not yet in the set, on
/// the same connection. A remote close or read error drops the feed back to
/// `Disconnected` with an empty set; there is no automatic reconnect.
#[derive(Clone)]
pub struct StreamingFeed {
    shared: Arc<FeedShared>,
}

impl StreamingFeed {
    pub fn new(config: StreamConfig, scope: CancellationToken) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                config,
                scope,
                state: Mutex::new(FeedState {
                    connection: ConnectionState::Disconnected,
                    subscriptions: HashSet::new(),
                    session_id: 0,
                    session: None,
                    pending_connect: None,
                }),
                writer: tokio::sync::Mutex::new(None),
                listeners: PriceListeners::default(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock_unpoisoned(&self.shared.state).connection
    }

    /// Current subscription set, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let state = lock_unpoisoned(&self.shared.state);
        let mut symbols: Vec<String> = state.subscriptions.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Register a consumer of price updates. Dropping the receiver unregisters it.
    pub fn subscribe_prices(&self) -> tokio::sync::mpsc::UnboundedReceiver<PriceUpdate> {
        self.shared.listeners.subscribe()
    }

    /// Subscribe `symbols`, connecting first if needed.
    ///
    /// A connect failure leaves the feed `Disconnected` with an empty set and is
    /// returned to the caller, and to every caller that joined the same pending
    /// connect. Calling this while a `stop` is in progress is an error.
    pub async fn start(&self, symbols: &[String]) -> Result<()> {
        let requested = clean_symbols(symbols)?;
        if requested.is_empty() {
            return Ok(());
        }

        let plan = {
            let mut state = lock_unpoisoned(&self.shared.state);
            match state.connection {
                ConnectionState::Open => {
                    let fresh: Vec<String> = requested
                        .into_iter()
                        .filter(|symbol| !state.subscriptions.contains(symbol))
                        .collect();
                    if fresh.is_empty() {
                        StartPlan::Nothing
                    } else {
                        state.subscriptions.extend(fresh.iter().cloned());
                        StartPlan::Incremental(fresh)
                    }
                }
                ConnectionState::Connecting => {
                    // Picked up by the initial subscribe once the socket opens.
                    state.subscriptions.extend(requested);
                    match state.pending_connect.clone() {
                        Some(pending) => StartPlan::Join(pending),
                        None => StartPlan::Nothing,
                    }
                }
                ConnectionState::Closing => StartPlan::Closing,
                ConnectionState::Disconnected => {
                    state.connection = ConnectionState::Connecting;
                    state.subscriptions = requested.into_iter().collect();
                    state.session_id += 1;
                    let (status, pending) = watch::channel(ConnectStatus::Pending);
                    state.pending_connect = Some(pending);
                    StartPlan::Connect(state.session_id, status)
                }
            }
        };

        match plan {
            StartPlan::Nothing => Ok(()),
            StartPlan::Closing => Err(AppError::message(
                "streaming feed is shutting down; start again once stop completes",
            )),
            StartPlan::Incremental(fresh) => {
                info!("Subscribing to {} more ticker(s): {:?}", fresh.len(), fresh);
                if let Err(err) = self.send_op("subscribe", &fresh).await {
                    let mut state = lock_unpoisoned(&self.shared.state);
                    for symbol in &fresh {
                        state.subscriptions.remove(symbol);
                    }
                    return Err(err);
                }
                Ok(())
            }
            StartPlan::Connect(session, status) => {
                let result = self.connect(session).await;
                {
                    let mut state = lock_unpoisoned(&self.shared.state);
                    if state.session_id == session {
                        state.pending_connect = None;
                    }
                }
                let _ = status.send(match &result {
                    Ok(()) => ConnectStatus::Open,
                    Err(err) => ConnectStatus::Failed(err.to_string()),
                });
                result
            }
            StartPlan::Join(mut pending) => {
                let status = pending
                    .wait_for(|status| *status != ConnectStatus::Pending)
                    .await
                    .map(|status| (*status).clone());
                match status {
                    Ok(ConnectStatus::Open) => Ok(()),
                    Ok(ConnectStatus::Failed(reason)) => Err(AppError::message(format!(
                        "streaming feed failed to connect: {}",
                        reason
                    ))),
                    Ok(ConnectStatus::Pending) | Err(_) => Err(AppError::message(
                        "streaming feed connect was abandoned",
                    )),
                }
            }
        }
    }

    /// Remove `symbols` from the set and, if open, tell the server. Unknown
    /// symbols are ignored.
    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        let symbols = clean_symbols(symbols)?;
        if symbols.is_empty() {
            return Ok(());
        }

        let open = {
            let mut state = lock_unpoisoned(&self.shared.state);
            for symbol in &symbols {
                state.subscriptions.remove(symbol);
            }
            state.connection == ConnectionState::Open
        };

        if !open {
            return Ok(());
        }
        info!("Unsubscribing from {:?}", symbols);
        self.send_op("unsubscribe", &symbols).await
    }

    /// Close the session and wait for the receive loop to exit. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let session = {
            let mut state = lock_unpoisoned(&self.shared.state);
            match state.connection {
                ConnectionState::Disconnected | ConnectionState::Closing => return Ok(()),
                ConnectionState::Connecting => {
                    // The pending connect sees this and closes its socket.
                    state.connection = ConnectionState::Disconnected;
                    state.subscriptions.clear();
                    return Ok(());
                }
                ConnectionState::Open => {
                    state.connection = ConnectionState::Closing;
                    state.subscriptions.clear();
                    state.session.take()
                }
            }
        };

        if let Some(session) = &session {
            session.cancel.cancel();
        }
        let closed = close_writer(&self.shared, None).await;

        if let Some(reader) = session.and_then(|session| session.reader) {
            if let Err(err) = reader.await {
                warn!("Stream receive loop ended abnormally: {}", err);
            }
        }

        lock_unpoisoned(&self.shared.state).connection = ConnectionState::Disconnected;
        info!("Streaming feed stopped");
        closed
    }

    async fn connect(&self, session: u64) -> Result<()> {
        let config = &self.shared.config;
        info!("Connecting to {}", config.url);

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(config.max_message_bytes);
        ws_config.max_frame_size = Some(config.max_message_bytes);

        let connected = tokio::time::timeout(
            config.connect_timeout(),
            connect_async_with_config(config.url.as_str(), Some(ws_config), false),
        )
        .await;

        let stream = match connected {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                warn!("Failed to connect to {}: {}", config.url, err);
                self.abandon_connect(session);
                return Err(err.into());
            }
            Err(_) => {
                warn!("Timed out connecting to {}", config.url);
                self.abandon_connect(session);
                return Err(AppError::message(format!(
                    "timed out after {:?} connecting to {}",
                    config.connect_timeout(),
                    config.url
                )));
            }
        };

        let (sink, source) = stream.split();
        let mut sink = Some(sink);

        let cancel = self.shared.scope.child_token();
        let initial = {
            let mut slot = self.shared.writer.lock().await;
            let mut state = lock_unpoisoned(&self.shared.state);
            if state.connection != ConnectionState::Connecting || state.session_id != session {
                None
            } else {
                *slot = sink.take().map(|sink| Writer { session, sink });
                state.connection = ConnectionState::Open;
                state.session = Some(Session {
                    cancel: cancel.clone(),
                    reader: None,
                });
                let mut symbols: Vec<String> = state.subscriptions.iter().cloned().collect();
                symbols.sort();
                Some(symbols)
            }
        };

        let Some(symbols) = initial else {
            debug!("Connect superseded by stop; closing new socket");
            if let Some(mut sink) = sink {
                if let Err(err) = sink.close().await {
                    debug!("Closing superseded socket: {}", err);
                }
            }
            return Err(AppError::Cancelled);
        };

        if let Err(err) = self.send_op("subscribe", &symbols).await {
            warn!("Initial subscribe failed: {}", err);
            if let Err(stop_err) = self.stop().await {
                debug!("Cleanup after failed subscribe: {}", stop_err);
            }
            return Err(err);
        }
        info!("Stream open; subscribed to {} ticker(s)", symbols.len());

        let reader = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            session,
            cancel,
            source,
        ));

        let mut state = lock_unpoisoned(&self.shared.state);
        let current = state.session_id == session;
        match state.session.as_mut() {
            Some(active) if current => active.reader = Some(reader),
            // Stopped meanwhile; the loop sees its token cancelled and exits.
            _ => drop(reader),
        }
        Ok(())
    }

    fn abandon_connect(&self, session: u64) {
        let mut state = lock_unpoisoned(&self.shared.state);
        if state.connection == ConnectionState::Connecting && state.session_id == session {
            state.connection = ConnectionState::Disconnected;
            state.subscriptions.clear();
        }
    }

    async fn send_op(&self, op: &str, symbols: &[String]) -> Result<()> {
        for frame in frames::op_frames(op, symbols, self.shared.config.max_args_per_frame) {
            send_message(&self.shared, Message::Text(frame)).await?;
        }
        Ok(())
    }
}

/// Trim, uppercase and dedupe. Separators are kept: dated contracts such as
/// `BTC-27DEC24` carry them in their topic names.
fn clean_symbols(symbols: &[String]) -> Result<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(symbols.len());
    for raw in symbols {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
            return Err(AppError::message(format!("invalid symbol `{}`", raw)));
        }
        if !cleaned.contains(&symbol) {
            cleaned.push(symbol);
        }
    }
    Ok(cleaned)
}

async fn send_message(shared: &FeedShared, message: Message) -> Result<()> {
    let mut writer = shared.writer.lock().await;
    match writer.as_mut() {
        Some(writer) => writer.sink.send(message).await.map_err(AppError::from),
        None => Err(AppError::message("streaming feed is not connected")),
    }
}

/// Send a normal close and drop the write half. With `only` set, a writer
/// belonging to another session is left alone.
async fn close_writer(shared: &FeedShared, only: Option<u64>) -> Result<()> {
    let mut slot = shared.writer.lock().await;
    if only.is_some_and(|session| slot.as_ref().map(|w| w.session) != Some(session)) {
        return Ok(());
    }
    let Some(mut writer) = slot.take() else {
        return Ok(());
    };

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client shutdown".into(),
    };
    match writer.sink.send(Message::Close(Some(frame))).await {
        Ok(()) => Ok(()),
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn receive_loop(
    shared: Arc<FeedShared>,
    session: u64,
    cancel: CancellationToken,
    mut source: WsSource,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stream receive loop cancelled");
                return;
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => handle_text(&shared, &text).await,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => handle_text(&shared, &text).await,
                Err(_) => debug!("Dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Ping(payload))) => {
                if let Err(err) = send_message(&shared, Message::Pong(payload)).await {
                    warn!("Failed to answer protocol ping: {}", err);
                }
            }
            Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                info!("Stream closed by server: {:?}", frame);
                break;
            }
            Some(Err(err)) => {
                warn!("Stream read failed: {}", err);
                break;
            }
            None => {
                info!("Stream ended");
                break;
            }
        }
    }

    // The server ended this session; fall back to Disconnected unless a stop
    // or a newer session already took over.
    let current = {
        let mut state = lock_unpoisoned(&shared.state);
        if state.connection == ConnectionState::Open && state.session_id == session {
            state.connection = ConnectionState::Disconnected;
            state.subscriptions.clear();
            state.session = None;
            true
        } else {
            false
        }
    };

    if current {
        let mut slot = shared.writer.lock().await;
        if slot.as_ref().is_some_and(|writer| writer.session == session) {
            if let Some(mut writer) = slot.take() {
                if let Err(err) = writer.sink.close().await {
                    debug!("Closing write half after remote close: {}", err);
                }
            }
        }
    }
}

async fn handle_text(shared: &FeedShared, text: &str) {
    match frames::parse_inbound(text) {
        Ok(Inbound::Ping) => {
            if let Err(err) = send_message(shared, Message::Text(frames::pong_frame())).await {
                warn!("Failed to answer ping: {}", err);
            }
        }
        Ok(Inbound::Ticker { symbol, data }) => {
            if !lock_unpoisoned(&shared.state).subscriptions.contains(&symbol) {
                debug!("Dropping ticker for unsubscribed {}", symbol);
                return;
            }
            match data.price() {
                Some((price, source)) => {
                    let update = PriceUpdate::new(symbol, price, source);
                    shared.listeners.publish(&update);
                }
                None => debug!("Ticker for {} carried no usable price", symbol),
            }
        }
        Ok(Inbound::Ack {
            op,
            success,
            message,
        }) => {
            if success {
                debug!("{} acknowledged", op);
            } else {
                warn!("{} rejected by server: {}", op, message);
            }
        }
        Ok(Inbound::Other) => {}
        Err(err) => debug!("Dropping unparsable frame: {}", err),
    }
}

//! Upstream Session
//!
//! Owns the single connection to the broker and drives it through
//!
//! ```text
//! Disconnected → Connecting → (Authenticating) → Live → Disconnected
//! ```
//!
//! - On transport open, a `login` is sent when the credentials need one;
//!   otherwise the session goes live at once.
//! - On entering Live it requests the asset list, and the balance when
//!   authenticated, then keeps the connection alive with heartbeat frames.
//! - Any transport error, close or rejected login returns it to
//!   Disconnected; it retries after the reconnect delay, forever by default.
//! - A [`SessionCommand`] tears the current transport down in any state and
//!   reconnects after a short settle delay. Cached data is untouched.
//!
//! Decoded market events are forwarded in transport order over a channel.
//! Other components see the session through a cloneable [`SessionHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, ORIGIN};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, AuthHandler, Credentials, SsidAuthStrategy};
use super::codec::{Frame, FrameCodec, HEARTBEAT_FRAME, PONG_FRAME};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager};
use super::messages::{InboundEvent, request_frame};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{UpstreamPort, UpstreamRequest};
use crate::domain::market::MarketEvent;
use crate::infrastructure::metrics;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection (or the session).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A handshake header could not be built.
    #[error("invalid handshake header: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// The handshake did not finish in time.
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The broker rejected the login.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// The broker closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The event consumer went away.
    #[error("event channel closed")]
    EventChannelClosed,

    /// The session task is gone or its command queue is full.
    #[error("session is not accepting commands")]
    CommandRejected,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

// =============================================================================
// State, Events and Commands
// =============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Waiting for the login result.
    Authenticating,
    /// Ready for requests.
    Live,
}

impl ConnectionState {
    /// Label for status output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Live => "live",
        }
    }

    /// Numeric code for the state gauge.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Authenticating => 2,
            Self::Live => 3,
        }
    }
}

/// Events emitted by the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session became live.
    Live {
        /// Whether the connection carries accepted credentials.
        authenticated: bool,
    },
    /// Transport went away.
    Disconnected,
    /// Waiting to reconnect.
    Reconnecting {
        /// Attempt number since the last live connection.
        attempt: u32,
    },
    /// A decoded market event, received while live.
    Market {
        /// The decoded event.
        event: MarketEvent,
        /// Cancelled when the connection the event arrived on ends.
        connection: CancellationToken,
    },
}

impl SessionEvent {
    /// Wrap a market event received on `connection`.
    #[must_use]
    pub fn market(event: MarketEvent, connection: &CancellationToken) -> Self {
        Self::Market {
            event,
            connection: connection.clone(),
        }
    }
}

/// Market events compare by payload; their connection tokens are ignored.
impl PartialEq for SessionEvent {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Live { authenticated: a }, Self::Live { authenticated: b }) => a == b,
            (Self::Disconnected, Self::Disconnected) => true,
            (Self::Reconnecting { attempt: a }, Self::Reconnecting { attempt: b }) => a == b,
            (Self::Market { event: a, .. }, Self::Market { event: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Commands accepted by a running session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Replace the credentials and restart.
    Reconfigure(Credentials),
    /// Restart with the current credentials.
    Reconnect,
}

/// Connection state shared between the session task and its handles.
#[derive(Debug)]
pub struct SessionState {
    state: RwLock<ConnectionState>,
    live: AtomicBool,
    authenticated: AtomicBool,
    connection_token: RwLock<CancellationToken>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    live_since: RwLock<Option<DateTime<Utc>>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Create the initial, disconnected state.
    #[must_use]
    pub fn new() -> Self {
        // No connection yet, so work scheduled now is already stale.
        let token = CancellationToken::new();
        token.cancel();
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            live: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            connection_token: RwLock::new(token),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            live_since: RwLock::new(None),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the session is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Whether the live connection is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    /// Reconnect attempts since the last live connection.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Frames received over the session's lifetime.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// When the current live connection was established.
    #[must_use]
    pub fn live_since(&self) -> Option<DateTime<Utc>> {
        *self.live_since.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        let live = state == ConnectionState::Live;
        self.live.store(live, Ordering::SeqCst);
        if !live {
            self.authenticated.store(false, Ordering::SeqCst);
            *self.live_since.write() = None;
        }
        metrics::set_upstream_state(state.code());
    }
}

// =============================================================================
// Session Handle
// =============================================================================

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
    command_tx: mpsc::Sender<SessionCommand>,
    outbound_tx: mpsc::Sender<UpstreamRequest>,
}

impl SessionHandle {
    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Token cancelled when the current connection leaves the live state.
    #[must_use]
    pub fn connection_token(&self) -> CancellationToken {
        self.state.connection_token.read().clone()
    }

    /// Replace the credentials and restart the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CommandRejected`] if the session task has
    /// stopped or is flooded with commands.
    pub fn reconfigure(&self, credentials: Credentials) -> Result<(), SessionError> {
        self.command(SessionCommand::Reconfigure(credentials))
    }

    /// Restart the session with the current credentials.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CommandRejected`] if the session task has
    /// stopped or is flooded with commands.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.command(SessionCommand::Reconnect)
    }

    fn command(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.command_tx
            .try_send(command)
            .map_err(|_| SessionError::CommandRejected)
    }
}

impl UpstreamPort for SessionHandle {
    fn is_live(&self) -> bool {
        self.state.is_live()
    }

    fn send(&self, request: UpstreamRequest) -> bool {
        if !self.state.is_live() {
            return false;
        }
        match self.outbound_tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                tracing::warn!(
                    event = request.event_name(),
                    "Upstream outbound queue full, dropping request"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for the upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamSessionConfig {
    /// Broker WebSocket URL.
    pub url: String,
    /// Optional `Origin` handshake header.
    pub origin: Option<String>,
    /// Initial credentials.
    pub credentials: Credentials,
    /// How a session token is presented.
    pub ssid_auth: SsidAuthStrategy,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Delay before reconnecting after a command.
    pub settle_delay: Duration,
}

impl UpstreamSessionConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            origin: None,
            credentials,
            ssid_auth: SsidAuthStrategy::default(),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            connect_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Upstream Session
// =============================================================================

/// How one connection ended without error.
enum ConnectionEnd {
    /// Process shutdown.
    Shutdown,
    /// A command asked for a restart.
    Restart,
}

/// The broker session task.
pub struct UpstreamSession {
    url: String,
    origin: Option<String>,
    reconnect: ReconnectConfig,
    heartbeat: HeartbeatConfig,
    connect_timeout: Duration,
    settle_delay: Duration,
    auth: AuthHandler,
    codec: FrameCodec,
    state: Arc<SessionState>,
    event_tx: mpsc::Sender<SessionEvent>,
    command_rx: mpsc::Receiver<SessionCommand>,
    outbound_rx: mpsc::Receiver<UpstreamRequest>,
    cancel: CancellationToken,
}

impl UpstreamSession {
    /// Create a session and its handle.
    #[must_use]
    pub fn new(
        config: UpstreamSessionConfig,
        event_tx: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let state = Arc::new(SessionState::new());

        let handle = SessionHandle {
            state: Arc::clone(&state),
            command_tx,
            outbound_tx,
        };
        let session = Self {
            url: config.url,
            origin: config.origin,
            reconnect: config.reconnect,
            heartbeat: config.heartbeat,
            connect_timeout: config.connect_timeout,
            settle_delay: config.settle_delay,
            auth: AuthHandler::new(config.credentials, config.ssid_auth),
            codec: FrameCodec::new(),
            state,
            event_tx,
            command_rx,
            outbound_rx,
            cancel,
        };
        (session, handle)
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error when reconnect attempts are exhausted or the event
    /// consumer has gone away.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        let mut delay = Duration::ZERO;

        loop {
            if !delay.is_zero() && !self.wait(delay).await {
                tracing::info!("Upstream session cancelled during reconnect delay");
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let outcome = self.connect_and_run(&mut policy).await;
            let was_live = self.state.is_live();
            self.auth.reset();
            self.state.set_state(ConnectionState::Disconnected);
            self.state.connection_token.read().cancel();

            match outcome {
                Ok(ConnectionEnd::Shutdown) => {
                    tracing::info!("Upstream session closed");
                    return Ok(());
                }
                Ok(ConnectionEnd::Restart) => {
                    self.emit(SessionEvent::Disconnected).await?;
                    policy.reset();
                    self.state.reconnect_attempts.store(0, Ordering::Relaxed);
                    delay = self.settle_delay;
                }
                Err(SessionError::EventChannelClosed) => {
                    return Err(SessionError::EventChannelClosed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, was_live, "Upstream connection lost");
                    self.emit(SessionEvent::Disconnected).await?;

                    let Some(next) = policy.next_delay() else {
                        return Err(SessionError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = policy.attempt_count();
                    self.state.reconnect_attempts.store(attempt, Ordering::Relaxed);
                    metrics::record_reconnect_attempt();
                    tracing::info!(
                        attempt,
                        delay_ms = next.as_millis(),
                        "Reconnecting to upstream"
                    );
                    self.emit(SessionEvent::Reconnecting { attempt }).await?;
                    delay = next;
                }
            }
        }
    }

    /// Sleep before reconnecting. A command during the wait replaces the
    /// remaining delay with the settle delay. Returns `false` on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                () = &mut sleep => return true,
                Some(command) = self.command_rx.recv() => {
                    self.apply_command(command);
                    sleep.as_mut().reset(tokio::time::Instant::now() + self.settle_delay);
                }
            }
        }
    }

    fn apply_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Reconfigure(credentials) => {
                tracing::info!(mode = credentials.mode(), "Upstream credentials replaced");
                self.auth.replace_credentials(credentials);
            }
            SessionCommand::Reconnect => {
                tracing::info!("Upstream reconnect requested");
            }
        }
    }

    /// Connect to the broker and run until the connection ends.
    async fn connect_and_run(
        &mut self,
        policy: &mut ReconnectPolicy,
    ) -> Result<ConnectionEnd, SessionError> {
        self.state.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.url, mode = self.auth.credentials().mode(), "Connecting to upstream");

        let mut request = self.url.as_str().into_client_request()?;
        for (name, value) in self.auth.handshake_headers() {
            request.headers_mut().insert(name, HeaderValue::from_str(&value)?);
        }
        if let Some(origin) = &self.origin {
            request.headers_mut().insert(ORIGIN, HeaderValue::from_str(origin)?);
        }

        let connect = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        );
        let ws_stream = tokio::select! {
            () = self.cancel.cancelled() => return Ok(ConnectionEnd::Shutdown),
            Some(command) = self.command_rx.recv() => {
                self.apply_command(command);
                return Ok(ConnectionEnd::Restart);
            }
            result = connect => {
                let (ws_stream, _response) =
                    result.map_err(|_| SessionError::ConnectTimeout(self.connect_timeout))??;
                ws_stream
            }
        };

        let (mut write, mut read) = ws_stream.split();

        // Requests queued for an earlier connection are stale.
        while self.outbound_rx.try_recv().is_ok() {}

        let connection = self.cancel.child_token();
        *self.state.connection_token.write() = connection.clone();
        let _connection_guard = connection.clone().drop_guard();

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat =
            HeartbeatManager::new(self.heartbeat.clone(), heartbeat_tx, connection.clone());
        tokio::spawn(heartbeat.run());

        if let Some(login) = self.auth.on_connected() {
            tracing::info!("Upstream transport open, logging in");
            self.state.set_state(ConnectionState::Authenticating);
            write.send(Message::text(login.to_frame(&self.codec))).await?;
        } else {
            self.go_live(&mut write, policy).await?;
        }

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
                Some(command) = self.command_rx.recv() => {
                    self.apply_command(command);
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Restart);
                }
                Some(HeartbeatEvent::SendPing) = heartbeat_rx.recv() => {
                    if self.state.is_live() {
                        write.send(Message::text(HEARTBEAT_FRAME)).await?;
                    }
                }
                Some(request) = self.outbound_rx.recv() => {
                    if self.state.is_live() {
                        metrics::record_upstream_request(request.event_name());
                        write.send(Message::text(request_frame(&self.codec, &request))).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_str(), &connection, &mut write, policy)
                                .await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Upstream sent close frame");
                            return Err(SessionError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Upstream stream ended");
                            return Err(SessionError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        text: &str,
        connection: &CancellationToken,
        write: &mut WsSink,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError> {
        self.state.frames_received.fetch_add(1, Ordering::Relaxed);
        let frame = self.codec.classify(text);
        metrics::record_upstream_frame(frame.as_str());

        match frame {
            Frame::Event => {}
            Frame::Ping => {
                write.send(Message::text(PONG_FRAME)).await?;
                return Ok(());
            }
            Frame::Close => return Err(SessionError::ConnectionClosed),
            Frame::Open | Frame::Pong | Frame::Connect | Frame::Other => return Ok(()),
        }

        let Some((name, payload)) = self.codec.decode(text) else {
            tracing::debug!("Dropping malformed upstream frame");
            return Ok(());
        };

        match InboundEvent::parse(&name, payload) {
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable upstream event");
            }
            Ok(InboundEvent::Login(result)) => {
                if !self.auth.state().is_authenticating() {
                    tracing::debug!("Ignoring unsolicited login result");
                    return Ok(());
                }
                self.auth.on_login_result(&result)?;
                tracing::info!("Upstream login accepted");
                self.go_live(write, policy).await?;
            }
            Ok(InboundEvent::Market(event)) => {
                if self.state.is_live() {
                    self.emit(SessionEvent::market(event, connection)).await?;
                } else {
                    tracing::debug!(event = event.label(), "Dropping event received before live");
                }
            }
        }
        Ok(())
    }

    async fn go_live(
        &mut self,
        write: &mut WsSink,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), SessionError> {
        let authenticated = self.auth.is_authenticated();
        policy.reset();
        self.state.reconnect_attempts.store(0, Ordering::Relaxed);
        self.state.set_state(ConnectionState::Live);
        self.state.authenticated.store(authenticated, Ordering::SeqCst);
        *self.state.live_since.write() = Some(Utc::now());

        write
            .send(Message::text(request_frame(&self.codec, &UpstreamRequest::AssetsStatus)))
            .await?;
        if authenticated {
            write
                .send(Message::text(request_frame(&self.codec, &UpstreamRequest::BalanceGet)))
                .await?;
        }

        tracing::info!(authenticated, "Upstream session live");
        self.emit(SessionEvent::Live { authenticated }).await
    }

    async fn emit(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| SessionError::EventChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (UpstreamSession, SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = UpstreamSessionConfig::new("ws://127.0.0.1:1/", Credentials::None);
        let (session, handle) = UpstreamSession::new(config, event_tx, CancellationToken::new());
        (session, handle, event_rx)
    }

    #[test]
    fn initial_state_is_disconnected() {
        let (_session, handle, _rx) = session();

        assert_eq!(handle.state().connection_state(), ConnectionState::Disconnected);
        assert!(!handle.is_live());
        assert!(handle.connection_token().is_cancelled());
        assert!(handle.state().live_since().is_none());
    }

    #[test]
    fn send_is_a_no_op_while_not_live() {
        let (_session, handle, _rx) = session();
        assert!(!handle.send(UpstreamRequest::AssetsStatus));
    }

    #[test]
    fn live_state_accepts_requests() {
        let (mut session, handle, _rx) = session();
        session.state.set_state(ConnectionState::Live);

        assert!(handle.send(UpstreamRequest::BalanceGet));
        assert_eq!(session.outbound_rx.try_recv().unwrap(), UpstreamRequest::BalanceGet);
    }

    #[test]
    fn leaving_live_clears_authentication() {
        let state = SessionState::new();
        state.set_state(ConnectionState::Live);
        state.authenticated.store(true, Ordering::SeqCst);

        state.set_state(ConnectionState::Disconnected);

        assert!(!state.is_authenticated());
        assert!(!state.is_live());
    }

    #[test]
    fn commands_fail_once_session_is_gone() {
        let (session, handle, _rx) = session();
        drop(session);

        assert!(matches!(
            handle.reconfigure(Credentials::None),
            Err(SessionError::CommandRejected)
        ));
    }

    #[tokio::test]
    async fn unreachable_upstream_schedules_reconnect() {
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let mut config = UpstreamSessionConfig::new("ws://127.0.0.1:1/", Credentials::None);
        config.reconnect = ReconnectConfig::fixed(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let (session, handle) = UpstreamSession::new(config, event_tx, cancel.clone());
        let task = tokio::spawn(session.run());

        let first = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(SessionEvent::Disconnected));
        let second = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .unwrap();
        assert_eq!(second, Some(SessionEvent::Reconnecting { attempt: 1 }));
        assert_eq!(handle.state().reconnect_attempts(), 1);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}

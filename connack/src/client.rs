//! Short-lived MQTT client handles.
//!
//! A handle exists for exactly one attempt: it is acquired, connected,
//! optionally disconnected, and closed. [`Released`] closes it on every exit
//! path, including unwinding.

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet,
    StateError, Transport,
};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use crate::reason::ReasonCode;

/// How long to drive the event loop while sending DISCONNECT.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause between retries when auto-reconnect is enabled.
const RECONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// A failed connect or disconnect, as reported by the client library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub code: ReasonCode,
    pub message: String,
}

impl ConnectFailure {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn timeout(after: Duration) -> Self {
        Self::new(
            ReasonCode::CLIENT_TIMEOUT,
            format!("timed out waiting for CONNACK after {}s", after.as_secs()),
        )
    }

    fn closed() -> Self {
        Self::new(ReasonCode::CLIENT_EXCEPTION, "client handle already closed")
    }

    /// The broker answered with a CONNACK.
    fn is_refusal(&self) -> bool {
        self.code.is_connack()
    }
}

impl std::fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (reason code {})", self.message, self.code)
    }
}

impl From<ConnectionError> for ConnectFailure {
    fn from(err: ConnectionError) -> Self {
        let code = match &err {
            ConnectionError::ConnectionRefused(rc) => ReasonCode::from_connack(*rc),
            ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => {
                ReasonCode::CLIENT_TIMEOUT
            }
            ConnectionError::Io(e) => io_reason(e),
            ConnectionError::MqttState(StateError::Io(e)) => io_reason(e),
            _ => ReasonCode::CLIENT_EXCEPTION,
        };
        Self::new(code, err.to_string())
    }
}

/// Map a transport error to a client-side reason code.
fn io_reason(err: &io::Error) -> ReasonCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::NotFound => ReasonCode::SERVER_CONNECT_ERROR,
        io::ErrorKind::TimedOut => ReasonCode::CLIENT_TIMEOUT,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe => ReasonCode::CONNECTION_LOST,
        _ => ReasonCode::CLIENT_EXCEPTION,
    }
}

/// One client connection, owned by a single attempt.
#[async_trait]
pub trait ClientHandle: Send {
    /// Client id used in the CONNECT.
    fn client_id(&self) -> &str;

    /// Send CONNECT and wait for the CONNACK.
    async fn connect(&mut self) -> std::result::Result<(), ConnectFailure>;

    /// Whether the last connect was accepted and not yet disconnected.
    fn is_connected(&self) -> bool;

    /// Send DISCONNECT.
    async fn disconnect(&mut self) -> std::result::Result<(), ConnectFailure>;

    /// Release the connection and its resources. Safe to call repeatedly.
    fn close(&mut self);
}

/// Creates client handles.
pub trait Connector: Send + Sync + 'static {
    type Handle: ClientHandle + 'static;

    /// Acquire a fresh handle for the given client id.
    fn acquire(&self, client_id: &str) -> Result<Self::Handle>;
}

/// Guard that closes a handle when dropped.
pub struct Released<H: ClientHandle> {
    handle: H,
}

impl<H: ClientHandle> Released<H> {
    pub fn new(handle: H) -> Self {
        Self { handle }
    }
}

impl<H: ClientHandle> Deref for Released<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H: ClientHandle> DerefMut for Released<H> {
    fn deref_mut(&mut self) -> &mut H {
        &mut self.handle
    }
}

impl<H: ClientHandle> Drop for Released<H> {
    fn drop(&mut self) {
        self.handle.close();
    }
}

/// Connector backed by rumqttc.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: Arc<ProbeConfig>,
}

impl MqttConnector {
    pub fn new(config: Arc<ProbeConfig>) -> Self {
        Self { config }
    }
}

impl Connector for MqttConnector {
    type Handle = MqttHandle;

    fn acquire(&self, client_id: &str) -> Result<MqttHandle> {
        self.config.validate()?;
        // MqttOptions::new panics on these.
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(Error::Acquire(format!("invalid client id {:?}", client_id)));
        }

        let cfg = &self.config;
        let mut options = MqttOptions::new(client_id, cfg.host.as_str(), cfg.port);
        options.set_keep_alive(cfg.keep_alive());
        options.set_clean_session(cfg.clean_session);
        if let Some(username) = &cfg.username {
            options.set_credentials(username.as_str(), cfg.password.clone().unwrap_or_default());
        }
        if cfg.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        // rumqttc bounds the TCP and CONNACK phase on its own (5s by default).
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(cfg.connect_timeout_secs);
        event_loop.set_network_options(network);
        debug!("Acquired client handle {} for {}", client_id, cfg.broker_addr());

        Ok(MqttHandle {
            client_id: client_id.to_string(),
            session: Some((client, event_loop)),
            connected: false,
            connect_timeout: cfg.connect_timeout(),
            auto_reconnect: cfg.auto_reconnect,
        })
    }
}

/// rumqttc client and event loop for one attempt.
pub struct MqttHandle {
    client_id: String,
    session: Option<(AsyncClient, EventLoop)>,
    connected: bool,
    connect_timeout: Duration,
    auto_reconnect: bool,
}

#[async_trait]
impl ClientHandle for MqttHandle {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&mut self) -> std::result::Result<(), ConnectFailure> {
        let (_, event_loop) = self.session.as_mut().ok_or_else(ConnectFailure::closed)?;
        let deadline = Instant::now() + self.connect_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match timeout(remaining, event_loop.poll()).await {
                Ok(event) => event,
                Err(_) => return Err(ConnectFailure::timeout(self.connect_timeout)),
            };

            match event {
                // Refusing CONNACKs surface as ConnectionError::ConnectionRefused.
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.connected = true;
                    return Ok(());
                }
                // CONNECT going out, nothing to decide yet.
                Ok(_) => continue,
                Err(err) => {
                    let failure = ConnectFailure::from(err);
                    if self.auto_reconnect && !failure.is_refusal() && Instant::now() < deadline {
                        debug!("Retrying {} after: {}", self.client_id, failure);
                        let left = deadline.saturating_duration_since(Instant::now());
                        sleep(RECONNECT_BACKOFF.min(left)).await;
                        continue;
                    }
                    return Err(failure);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected && self.session.is_some()
    }

    async fn disconnect(&mut self) -> std::result::Result<(), ConnectFailure> {
        let (client, event_loop) = self.session.as_mut().ok_or_else(ConnectFailure::closed)?;
        self.connected = false;

        client
            .disconnect()
            .await
            .map_err(|e| ConnectFailure::new(ReasonCode::CLIENT_EXCEPTION, e.to_string()))?;

        // The request only reaches the wire while the event loop is polled.
        loop {
            match timeout(DISCONNECT_TIMEOUT, event_loop.poll()).await {
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return Ok(()),
                Ok(Ok(_)) => continue,
                // The broker closing the socket after DISCONNECT is fine.
                Ok(Err(err)) => {
                    debug!("Event loop ended during disconnect: {}", err);
                    return Ok(());
                }
                Err(_) => {
                    warn!(
                        "DISCONNECT for {} not sent within {:?}",
                        self.client_id, DISCONNECT_TIMEOUT
                    );
                    return Err(ConnectFailure::new(
                        ReasonCode::CLIENT_TIMEOUT,
                        "timed out sending DISCONNECT",
                    ));
                }
            }
        }
    }

    fn close(&mut self) {
        if self.session.take().is_some() {
            debug!("Released client handle {}", self.client_id);
        }
        self.connected = false;
    }
}

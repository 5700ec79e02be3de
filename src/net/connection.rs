//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Drive one QUIC connection through `Idle → Handshaking → Established →
//!   Closing → Closed`
//! - Hand out streams only while established
//! - Flush, close and drain on request; release every stream on close
//! - Track the server's active connections for graceful shutdown

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use quinn::VarInt;
use tokio::sync::watch;

use crate::net::alpn;
use crate::net::error::{TimeoutPhase, TransportError, TransportResult};
use crate::net::settings::TransportSettings;
use crate::net::stream::{Stream, StreamId, StreamSides};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Application close code for a normal close.
pub const CLOSE_DONE: u32 = 0;
/// Application close code sent when the server shuts down.
pub const CLOSE_SHUTDOWN: u32 = 1;
/// Application close code for a peer that broke the exchange rules.
pub const CLOSE_PROTOCOL: u32 = 2;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, no packets exchanged yet.
    Idle,
    /// Key exchange, certificate verification and ALPN in progress.
    Handshaking,
    /// Usable for streams.
    Established,
    /// Flushing streams and draining after a local close.
    Closing,
    /// Terminal.
    Closed,
}

/// Which side of the handshake this endpoint played.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionInner {
    id: ConnectionId,
    role: Role,
    remote: SocketAddr,
    local: Option<SocketAddr>,
    drain_timeout: Duration,
    /// Endpoint owned by this connection alone, drained on close.
    endpoint: OnceLock<quinn::Endpoint>,
    quic: OnceLock<quinn::Connection>,
    protocol: OnceLock<Vec<u8>>,
    state: watch::Sender<ConnectionState>,
    streams: DashMap<StreamId, Arc<StreamSides>>,
}

impl ConnectionInner {
    /// The peer or the idle timer ended the connection.
    pub(crate) fn mark_lost(&self) {
        let changed = self.state.send_if_modified(|state| match state {
            ConnectionState::Established => {
                *state = ConnectionState::Closed;
                true
            }
            _ => false,
        });
        if changed {
            self.release_streams();
            tracing::debug!(connection_id = %self.id, role = %self.role, "Connection lost");
        }
    }

    pub(crate) fn forget_stream(&self, id: StreamId) {
        self.streams.remove(&id);
    }

    fn release_streams(&self) {
        for entry in self.streams.iter() {
            entry.value().close_both();
        }
        self.streams.clear();
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }
}

/// Handle to one secure transport session.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        role: Role,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        settings: &TransportSettings,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                role,
                remote,
                local,
                drain_timeout: settings.drain_timeout,
                endpoint: OnceLock::new(),
                quic: OnceLock::new(),
                protocol: OnceLock::new(),
                state,
                streams: DashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local
    }

    /// Protocol agreed on during the handshake, if any.
    pub fn protocol(&self) -> Option<&[u8]> {
        self.inner.protocol.get().map(Vec::as_slice)
    }

    /// Current state. Observing a connection the peer already ended moves it
    /// to `Closed`.
    pub fn state(&self) -> ConnectionState {
        let current = *self.inner.state.borrow();
        if current == ConnectionState::Established {
            if let Some(quic) = self.inner.quic.get() {
                if quic.close_reason().is_some() {
                    self.inner.mark_lost();
                    return *self.inner.state.borrow();
                }
            }
        }
        current
    }

    /// Number of streams currently registered on this connection.
    pub fn stream_count(&self) -> usize {
        self.inner.streams.len()
    }

    /// Open a new bidirectional stream.
    pub async fn open_stream(&self) -> TransportResult<Stream> {
        let quic = self.established()?;
        let (send, recv) = quic.open_bi().await.map_err(|e| self.lost(&e))?;
        Ok(self.register(send, recv))
    }

    /// Wait for the peer to open a bidirectional stream.
    pub async fn accept_stream(&self) -> TransportResult<Stream> {
        let quic = self.established()?;
        let (send, recv) = quic.accept_bi().await.map_err(|e| self.lost(&e))?;
        Ok(self.register(send, recv))
    }

    /// Close with the normal close code.
    pub async fn close(&self) {
        self.close_with(CLOSE_DONE, b"done").await
    }

    /// Flush finished streams, signal termination, release all streams.
    ///
    /// Idempotent: later calls wait for the first one to finish.
    pub async fn close_with(&self, code: u32, reason: &[u8]) {
        let mut previous = None;
        self.inner.state.send_if_modified(|state| match *state {
            ConnectionState::Established => {
                previous = Some(ConnectionState::Established);
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Idle | ConnectionState::Handshaking => {
                previous = Some(*state);
                *state = ConnectionState::Closed;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        });

        match previous {
            Some(ConnectionState::Established) => {}
            Some(_) => {
                tracing::debug!(connection_id = %self.inner.id, "Connection closed before handshake completed");
                return;
            }
            None => {
                let mut state = self.inner.state.subscribe();
                let _ = state
                    .wait_for(|s| *s == ConnectionState::Closed)
                    .await
                    .map(|_| ());
                return;
            }
        }

        let drain = self.inner.drain_timeout;
        if tokio::time::timeout(drain, self.flush()).await.is_err() {
            tracing::debug!(
                connection_id = %self.inner.id,
                "Drain deadline elapsed with unacknowledged stream data"
            );
        }

        if let Some(quic) = self.inner.quic.get() {
            quic.close(VarInt::from_u32(code), reason);
        }
        if let Some(endpoint) = self.inner.endpoint.get() {
            let _ = tokio::time::timeout(drain, endpoint.wait_idle()).await;
        }

        self.inner.release_streams();
        self.inner.set_state(ConnectionState::Closed);
        tracing::debug!(connection_id = %self.inner.id, role = %self.inner.role, "Connection closed");
    }

    /// Wait until every half-closed write side has been acknowledged.
    async fn flush(&self) {
        let pending: Vec<_> = self
            .inner
            .streams
            .iter()
            .filter(|entry| entry.value().flush_pending())
            .map(|entry| entry.value().flushed())
            .collect();

        for mut flushed in pending {
            let _ = flushed.wait_for(|done| *done).await.map(|_| ());
        }
    }

    fn established(&self) -> TransportResult<&quinn::Connection> {
        if self.state() != ConnectionState::Established {
            return Err(TransportError::ConnectionClosed);
        }
        self.inner
            .quic
            .get()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn lost(&self, err: &quinn::ConnectionError) -> TransportError {
        self.inner.mark_lost();
        TransportError::from_connection(err)
    }

    fn register(&self, send: quinn::SendStream, recv: quinn::RecvStream) -> Stream {
        let sides = Arc::new(StreamSides::new());
        let stream = Stream::new(send, recv, Arc::clone(&sides), Arc::downgrade(&self.inner));
        self.inner.streams.insert(stream.id(), sides);
        tracing::trace!(connection_id = %self.inner.id, stream_id = %stream.id(), "Stream registered");
        stream
    }

    pub(crate) fn adopt_endpoint(&self, endpoint: quinn::Endpoint) {
        let _ = self.inner.endpoint.set(endpoint);
    }

    /// `Idle → Handshaking`, once the first flight is on its way.
    pub(crate) fn begin_handshake(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Handshaking;
                true
            } else {
                false
            }
        });
    }

    /// Run the handshake to completion, enforcing the timeout and the ALPN
    /// offer. Any failure leaves the connection `Closed`.
    pub(crate) async fn handshake(
        &self,
        connecting: quinn::Connecting,
        timeout: Duration,
        offered: &[Vec<u8>],
    ) -> TransportResult<()> {
        if *self.inner.state.borrow() != ConnectionState::Handshaking {
            return Err(TransportError::ConnectionClosed);
        }

        let mut state = self.inner.state.subscribe();
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, connecting) => match result {
                Ok(Ok(quic)) => Ok(quic),
                Ok(Err(e)) => Err(TransportError::from_handshake(e)),
                Err(_) => Err(TransportError::Timeout(TimeoutPhase::Handshake)),
            },
            _ = async { state.wait_for(|s| *s == ConnectionState::Closed).await.map(|_| ()) } => {
                Err(TransportError::ConnectionClosed)
            }
        };

        let quic = match outcome {
            Ok(quic) => quic,
            Err(e) => {
                self.inner.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };

        let protocol = negotiated_protocol(&quic);
        if let Err(e) = alpn::verify(offered, protocol.as_deref()) {
            quic.close(VarInt::from_u32(CLOSE_PROTOCOL), b"protocol mismatch");
            self.inner.set_state(ConnectionState::Closed);
            return Err(e);
        }
        if let Some(protocol) = protocol {
            let _ = self.inner.protocol.set(protocol);
        }

        let _ = self.inner.quic.set(quic.clone());
        let established = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Handshaking {
                *state = ConnectionState::Established;
                true
            } else {
                false
            }
        });
        if !established {
            quic.close(VarInt::from_u32(CLOSE_DONE), b"closed during handshake");
            return Err(TransportError::ConnectionClosed);
        }

        tracing::debug!(
            connection_id = %self.inner.id,
            role = %self.inner.role,
            remote = %self.inner.remote,
            protocol = ?self.protocol().map(alpn::display),
            "Handshake complete"
        );
        Ok(())
    }
}

fn negotiated_protocol(quic: &quinn::Connection) -> Option<Vec<u8>> {
    quic.handshake_data()
        .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
        .and_then(|data| data.protocol)
}

/// Tracks the server's active connections for graceful shutdown.
///
/// Only the accept loop inserts (via [`ConnectionTracker::track`]) and only
/// the connection's own guard removes.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that removes it on drop.
    pub fn track(&self, connection: &Connection) -> ConnectionGuard {
        self.active.insert(connection.id(), connection.clone());
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: connection.id(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Close every tracked connection with the given code.
    ///
    /// Connections close concurrently, so the call takes as long as the
    /// slowest close rather than the sum of them.
    pub async fn close_all(&self, code: u32, reason: &[u8]) {
        let connections: Vec<Connection> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        join_all(
            connections
                .iter()
                .map(|connection| connection.close_with(code, reason)),
        )
        .await;
    }

    /// Wait until all connections are gone or the deadline passes.
    pub async fn wait_for_shutdown(&self, deadline: Duration) -> bool {
        let wait = async {
            while !self.active.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Guard that tracks a connection's lifetime.
/// Removes the connection from its tracker when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<DashMap<ConnectionId, Connection>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.remove(&self.id);
        tracing::trace!(connection_id = %self.id, "Connection untracked");
    }
}

//! QUIC listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind the UDP endpoint with the server identity
//! - Accept incoming QUIC connections
//! - Enforce max_connections limit via semaphore
//! - Close and drain the endpoint on shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::VarInt;
use tokio::sync::Semaphore;

use crate::net::connection::{Connection, Role};
use crate::net::error::{TransportError, TransportResult};
use crate::net::session::Connecting;
use crate::net::settings::TransportSettings;
use crate::net::tls::{self, Identity};

/// A bounded QUIC listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    /// The underlying QUIC endpoint.
    endpoint: quinn::Endpoint,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    settings: Arc<TransportSettings>,
}

impl Listener {
    /// Bind to `addr`, presenting `identity` to every client.
    pub fn bind(
        addr: SocketAddr,
        identity: &Identity,
        settings: TransportSettings,
        max_connections: usize,
    ) -> TransportResult<Self> {
        let mut config = tls::server_config(identity, &settings.alpn_protocols)?;
        config.transport_config(settings.quic_transport());

        // Semaphore::new panics above MAX_PERMITS.
        let max_connections = max_connections.min(Semaphore::MAX_PERMITS);
        let endpoint = quinn::Endpoint::server(config, addr)
            .map_err(|source| TransportError::Bind { addr, source })?;

        let local_addr = endpoint
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        tracing::info!(
            address = %local_addr,
            max_connections = max_connections,
            "Listener bound"
        );

        Ok(Self {
            endpoint,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            settings: Arc::new(settings),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached. Returns the
    /// pending handshake and a permit that must be held for the connection's
    /// lifetime, or `None` once the listener is closed.
    pub async fn accept(&self) -> Option<TransportResult<(Connecting, ConnectionPermit)>> {
        // Acquire permit first (backpressure)
        let permit = self.connection_limit.clone().acquire_owned().await.ok()?;

        let incoming = self.endpoint.accept().await?;
        let remote = incoming.remote_address();

        let inner = match incoming.accept() {
            Ok(inner) => inner,
            Err(e) => return Some(Err(TransportError::from_handshake(e))),
        };

        let connection = Connection::new(
            Role::Server,
            remote,
            self.endpoint.local_addr().ok(),
            &self.settings,
        );

        tracing::debug!(
            connection_id = %connection.id(),
            peer_addr = %remote,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        let connecting = Connecting::new(
            connection,
            inner,
            self.settings.handshake_timeout,
            Vec::new(),
        );
        Some(Ok((connecting, ConnectionPermit { _permit: permit })))
    }

    /// Stop accepting, close every connection and wait for the endpoint to
    /// drain, bounded by the drain timeout.
    pub async fn shutdown(&self, code: u32, reason: &[u8]) {
        self.connection_limit.close();
        self.endpoint.close(VarInt::from_u32(code), reason);
        if tokio::time::timeout(self.settings.drain_timeout, self.endpoint.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("Endpoint did not drain before the deadline");
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.endpoint.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub(crate) fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// One-shot accept: bind `addr` and complete a handshake with the first
/// client. The returned connection owns the endpoint and drains it on close.
pub async fn accept(
    addr: SocketAddr,
    identity: &Identity,
    settings: &TransportSettings,
) -> TransportResult<Connection> {
    let listener = Listener::bind(addr, identity, settings.clone(), 1)?;
    let (connecting, _permit) = listener
        .accept()
        .await
        .ok_or(TransportError::ConnectionClosed)??;

    connecting.connection().adopt_endpoint(listener.endpoint().clone());
    connecting.established().await
}

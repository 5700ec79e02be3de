//! Establishing sessions: client dialing and the in-progress handshake handle.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use crate::net::connection::{Connection, Role};
use crate::net::error::{TransportError, TransportResult};
use crate::net::settings::TransportSettings;
use crate::net::tls::{self, TrustAnchor};

/// A connection whose handshake has not finished yet.
///
/// The [`Connection`] handle exists from the start, so its state can be
/// observed while the handshake runs; it refuses streams until established.
pub struct Connecting {
    connection: Connection,
    inner: quinn::Connecting,
    timeout: Duration,
    /// Protocols to verify the outcome against; empty on the server side.
    offered: Vec<Vec<u8>>,
}

impl Connecting {
    pub(crate) fn new(
        connection: Connection,
        inner: quinn::Connecting,
        timeout: Duration,
        offered: Vec<Vec<u8>>,
    ) -> Self {
        connection.begin_handshake();
        Self {
            connection,
            inner,
            timeout,
            offered,
        }
    }

    /// Handle to the connection being established.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Wait for the handshake to finish.
    pub async fn established(self) -> TransportResult<Connection> {
        self.connection
            .handshake(self.inner, self.timeout, &self.offered)
            .await?;
        Ok(self.connection)
    }
}

impl std::fmt::Debug for Connecting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connecting")
            .field("connection", &self.connection)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Client-side connection factory.
///
/// Every connection gets its own UDP endpoint, which it drains on close.
#[derive(Debug, Clone)]
pub struct Dialer {
    config: quinn::ClientConfig,
    settings: Arc<TransportSettings>,
    server_name: String,
}

impl Dialer {
    /// Verify servers against `anchor`, expecting `server_name` in their certificate.
    pub fn new(
        anchor: &TrustAnchor,
        server_name: impl Into<String>,
        settings: TransportSettings,
    ) -> TransportResult<Self> {
        let mut config = tls::client_config(anchor, &settings.alpn_protocols)?;
        config.transport_config(settings.quic_transport());
        Ok(Self {
            config,
            settings: Arc::new(settings),
            server_name: server_name.into(),
        })
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Send the first flight and return without waiting for the handshake.
    pub fn start(&self, remote: SocketAddr) -> TransportResult<Connecting> {
        let bind = if remote.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let endpoint = quinn::Endpoint::client(bind)
            .map_err(|source| TransportError::Bind { addr: bind, source })?;

        let inner = endpoint
            .connect_with(self.config.clone(), remote, &self.server_name)
            .map_err(TransportError::from_connect)?;

        let connection = Connection::new(
            Role::Client,
            remote,
            endpoint.local_addr().ok(),
            &self.settings,
        );
        connection.adopt_endpoint(endpoint);

        tracing::debug!(
            connection_id = %connection.id(),
            remote = %remote,
            server_name = %self.server_name,
            "Connecting"
        );

        Ok(Connecting::new(
            connection,
            inner,
            self.settings.handshake_timeout,
            self.settings.alpn_protocols.clone(),
        ))
    }

    /// Connect and wait for the handshake.
    pub async fn connect(&self, remote: SocketAddr) -> TransportResult<Connection> {
        self.start(remote)?.established().await
    }
}

/// One-shot connect: handshake with `remote`, verifying it against `anchor`.
pub async fn connect(
    remote: SocketAddr,
    server_name: &str,
    anchor: &TrustAnchor,
    settings: &TransportSettings,
) -> TransportResult<Connection> {
    Dialer::new(anchor, server_name, settings.clone())?
        .connect(remote)
        .await
}

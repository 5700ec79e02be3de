//! Server role: accept loop with per-connection isolation.
//!
//! # Responsibilities
//! - Accept connections until shutdown, bounded by `max_connections`
//! - Run each handshake and connection on its own task
//! - For each peer stream: call the handler once on the whole request, or on
//!   every chunk as it arrives, per [`Handler::delivery`]; end the response
//!   with end-of-stream
//! - Reap finished stream tasks while the connection is still open
//! - Log and count failures without disturbing other connections
//!
//! # Design Decisions
//! - Only the accept loop inserts into the connection tracker; each
//!   connection's guard removes itself
//! - A connection ends when its peer closes it or the server shuts down
//! - Shutdown closes every connection at once under a single drain deadline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::config::ListenerConfig;
use crate::exchange::handler::{Delivery, Handler, RequestContext, ServerStats};
use crate::net::connection::{ConnectionGuard, CLOSE_SHUTDOWN};
use crate::net::listener::ConnectionPermit;
use crate::net::{
    Connecting, Connection, ConnectionTracker, ErrorKind, Identity, Listener, Role, Stream,
    StreamId, TransportError, TransportResult, TransportSettings,
};
use crate::observability::metrics;

/// Application error code used to reset oversized requests.
const RESET_TOO_LARGE: u32 = 0x10;

/// Server-side limits.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub max_connections: usize,
    pub max_request_bytes: usize,
    pub settings: TransportSettings,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&ListenerConfig::default(), TransportSettings::default())
    }
}

impl ServerOptions {
    pub fn from_config(listener: &ListenerConfig, settings: TransportSettings) -> Self {
        Self {
            max_connections: listener.max_connections,
            max_request_bytes: listener.max_request_bytes,
            settings,
        }
    }
}

/// State every connection task needs.
struct Shared<H> {
    handler: H,
    stats: Arc<ServerStats>,
    max_request_bytes: usize,
    read_chunk_size: usize,
}

impl<H> Shared<H> {
    /// Number the next request and describe where it came from.
    fn next_context(&self, connection: &Connection, stream_id: StreamId) -> RequestContext {
        RequestContext {
            request_number: self.stats.record_request(),
            connection_id: connection.id(),
            stream_id,
            remote: connection.remote_address(),
        }
    }
}

/// A bound server, ready to run.
pub struct Server<H> {
    listener: Listener,
    shared: Arc<Shared<H>>,
    tracker: ConnectionTracker,
}

impl<H: Handler> Server<H> {
    /// Bind the listener. Fails with `Bind` if the address is taken.
    pub fn bind(
        addr: SocketAddr,
        identity: &Identity,
        options: ServerOptions,
        handler: H,
    ) -> TransportResult<Self> {
        let read_chunk_size = options.settings.read_chunk_size;
        let listener = Listener::bind(addr, identity, options.settings, options.max_connections)?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                handler,
                stats: Arc::new(ServerStats::default()),
                max_request_bytes: options.max_request_bytes,
                read_chunk_size,
            }),
            tracker: ConnectionTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.shared.stats)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires, then close every connection and drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let addr = self.listener.local_addr().ok();
        tracing::info!(address = ?addr, "Server accepting connections");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown requested, no longer accepting");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Some(Ok((connecting, permit))) => {
                        let guard = self.tracker.track(connecting.connection());
                        metrics::record_connection_accepted();
                        metrics::set_active_connections(self.tracker.active_count());
                        let span = tracing::info_span!(
                            "connection",
                            connection_id = %connecting.connection().id(),
                            peer_addr = %connecting.remote_address(),
                        );
                        let shared = Arc::clone(&self.shared);
                        connections.spawn(
                            serve_connection(connecting, guard, permit, shared).instrument(span),
                        );
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                    }
                    None => {
                        tracing::info!("Listener closed");
                        break;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {
                    metrics::set_active_connections(self.tracker.active_count());
                }
            }
        }

        // Closing and joining share one drain deadline.
        let drain = self.listener.settings().drain_timeout;
        let drained = tokio::time::timeout(drain, async {
            self.tracker
                .close_all(CLOSE_SHUTDOWN, b"server shutting down")
                .await;
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_ok();
        if !drained {
            tracing::warn!(remaining = connections.len(), "Aborting connections that did not finish");
            connections.abort_all();
        }
        self.listener
            .shutdown(CLOSE_SHUTDOWN, b"server shutting down")
            .await;
        metrics::set_active_connections(self.tracker.active_count());

        tracing::info!(
            requests = self.shared.stats.requests(),
            connections = self.shared.stats.connections(),
            "Server stopped"
        );
    }
}

/// Bind and run until `shutdown` fires.
pub async fn run_server<H: Handler>(
    addr: SocketAddr,
    identity: &Identity,
    handler: H,
    options: ServerOptions,
    shutdown: broadcast::Receiver<()>,
) -> TransportResult<()> {
    Server::bind(addr, identity, options, handler)?
        .run(shutdown)
        .await;
    Ok(())
}

async fn serve_connection<H: Handler>(
    connecting: Connecting,
    _guard: ConnectionGuard,
    _permit: ConnectionPermit,
    shared: Arc<Shared<H>>,
) {
    let connection = match connecting.established().await {
        Ok(connection) => connection,
        Err(e) => {
            shared.stats.record_handshake_failure();
            metrics::record_handshake_failure(Role::Server);
            tracing::warn!(error = %e, "Handshake failed");
            return;
        }
    };
    shared.stats.record_connection();
    tracing::info!("Connection established");

    let mut streams = JoinSet::new();
    loop {
        tokio::select! {
            accepted = connection.accept_stream() => match accepted {
                Ok(stream) => {
                    shared.stats.stream_started();
                    streams.spawn(
                        serve_stream(connection.clone(), stream, Arc::clone(&shared))
                            .in_current_span(),
                    );
                }
                Err(TransportError::ConnectionClosed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Connection failed");
                    break;
                }
            },
            Some(_) = streams.join_next(), if !streams.is_empty() => {
                shared.stats.stream_reaped();
            }
        }
    }

    while streams.join_next().await.is_some() {
        shared.stats.stream_reaped();
    }
    connection.close().await;
    tracing::info!("Connection finished");
}

async fn serve_stream<H: Handler>(connection: Connection, mut stream: Stream, shared: Arc<Shared<H>>) {
    let stream_id = stream.id();
    let started = Instant::now();
    let served = match shared.handler.delivery() {
        Delivery::Whole => respond_whole(&connection, &mut stream, &shared).await,
        Delivery::Chunked => respond_chunked(&connection, &mut stream, &shared).await,
    };

    match served {
        Ok((request_number, request_bytes)) => {
            metrics::record_request(request_bytes);
            metrics::record_request_duration(started.elapsed());
            tracing::debug!(
                stream_id = %stream_id,
                request_number,
                request_bytes,
                "Request served"
            );
        }
        Err(e) => {
            if e.kind() == ErrorKind::PayloadTooLarge {
                stream.reset(RESET_TOO_LARGE);
            }
            tracing::warn!(stream_id = %stream_id, error = %e, "Failed to serve request");
        }
    }
}

/// Read to end-of-stream, answer once. Returns the request number and size.
async fn respond_whole<H: Handler>(
    connection: &Connection,
    stream: &mut Stream,
    shared: &Shared<H>,
) -> TransportResult<(u64, usize)> {
    let request = stream
        .read_to_end(shared.read_chunk_size, shared.max_request_bytes)
        .await?;
    let request_bytes = request.len();

    let context = shared.next_context(connection, stream.id());
    let response = shared.handler.handle(&context, request);
    stream.write(&response, true).await?;
    Ok((context.request_number, request_bytes))
}

/// Answer every chunk as it arrives, then mirror the peer's end-of-stream.
async fn respond_chunked<H: Handler>(
    connection: &Connection,
    stream: &mut Stream,
    shared: &Shared<H>,
) -> TransportResult<(u64, usize)> {
    let stream_id = stream.id();
    let mut context: Option<RequestContext> = None;
    let mut received = 0;

    loop {
        let (chunk, end_of_stream) = stream.read(shared.read_chunk_size).await?;
        received += chunk.len();
        if received > shared.max_request_bytes {
            return Err(TransportError::PayloadTooLarge {
                limit: shared.max_request_bytes,
            });
        }

        if !chunk.is_empty() {
            let context =
                context.get_or_insert_with(|| shared.next_context(connection, stream_id));
            let response = shared.handler.handle(context, chunk);
            if !response.is_empty() {
                stream.write(&response, false).await?;
            }
        }

        if end_of_stream {
            let request_number = match &context {
                Some(context) => context.request_number,
                None => shared.next_context(connection, stream_id).request_number,
            };
            stream.finish()?;
            return Ok((request_number, received));
        }
    }
}

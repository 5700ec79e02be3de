//! Request handlers and server-wide request accounting.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::net::{ConnectionId, StreamId};

/// Where a request came from and its position in the server's sequence.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 1-based sequence number across all connections.
    pub request_number: u64,
    pub connection_id: ConnectionId,
    pub stream_id: StreamId,
    pub remote: SocketAddr,
}

/// How the server feeds a request to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Buffer until end-of-stream, call `handle` once, then answer with
    /// end-of-stream.
    #[default]
    Whole,
    /// Call `handle` for every chunk as it arrives and write each answer
    /// straight away; end-of-stream is mirrored once the peer sends it.
    Chunked,
}

/// Turns request payloads into response payloads.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, context: &RequestContext, request: Bytes) -> Bytes;

    fn delivery(&self) -> Delivery {
        Delivery::Whole
    }
}

impl<F> Handler for F
where
    F: Fn(Bytes) -> Bytes + Send + Sync + 'static,
{
    fn handle(&self, _context: &RequestContext, request: Bytes) -> Bytes {
        self(request)
    }
}

/// Sends every request back unchanged, chunk by chunk.
///
/// A peer that keeps its side open still sees its bytes come back.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, context: &RequestContext, chunk: Bytes) -> Bytes {
        tracing::trace!(
            request_number = context.request_number,
            connection_id = %context.connection_id,
            bytes = chunk.len(),
            "Echoing chunk"
        );
        chunk
    }

    fn delivery(&self) -> Delivery {
        Delivery::Chunked
    }
}

/// Counters shared by every connection of a server.
#[derive(Debug, Default)]
pub struct ServerStats {
    requests: AtomicU64,
    connections: AtomicU64,
    handshake_failures: AtomicU64,
    active_streams: AtomicU64,
}

impl ServerStats {
    /// Count a request and return its sequence number.
    pub fn record_request(&self) -> u64 {
        self.requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Connections that completed their handshake.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn handshake_failures(&self) -> u64 {
        self.handshake_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn stream_started(&self) {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stream_reaped(&self) {
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    /// Stream tasks spawned and not yet collected by their connection.
    pub fn active_streams(&self) -> u64 {
        self.active_streams.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_numbers_start_at_one() {
        let stats = ServerStats::default();
        assert_eq!(stats.record_request(), 1);
        assert_eq!(stats.record_request(), 2);
        assert_eq!(stats.requests(), 2);
    }

    #[test]
    fn closures_take_whole_requests_and_echo_streams() {
        let upper = |request: Bytes| Bytes::from(request.to_ascii_uppercase());
        assert_eq!(upper.delivery(), Delivery::Whole);
        assert_eq!(EchoHandler.delivery(), Delivery::Chunked);
    }
}

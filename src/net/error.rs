//! Transport error taxonomy.
//!
//! Every failure the transport surfaces maps onto one [`ErrorKind`], so callers
//! can branch on the kind without caring which quinn error produced it.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::net::stream::StreamId;
use crate::net::tls::TlsError;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// No handshake completion within the handshake timeout.
    Handshake,
    /// No traffic within the negotiated idle timeout.
    Idle,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Handshake => write!(f, "handshake"),
            TimeoutPhase::Idle => write!(f, "idle"),
        }
    }
}

/// Errors produced by the transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Certificate verification or protocol negotiation failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Handshake or idle deadline expired.
    #[error("{0} timeout elapsed")]
    Timeout(TimeoutPhase),

    /// Peer unreachable, reset, or a transport-level protocol violation.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection is not established (yet or anymore).
    #[error("connection is closed")]
    ConnectionClosed,

    /// The relevant side of the stream already left the open state.
    #[error("stream {0} is closed")]
    StreamClosed(StreamId),

    /// The listening address could not be acquired.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A peer sent more than the configured limit on one stream.
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Certificate material could not be loaded or used.
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Coarse classification of [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Handshake,
    Timeout,
    Connection,
    ConnectionClosed,
    StreamClosed,
    Bind,
    PayloadTooLarge,
    Tls,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Handshake(_) => ErrorKind::Handshake,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Connection(_) => ErrorKind::Connection,
            TransportError::ConnectionClosed => ErrorKind::ConnectionClosed,
            TransportError::StreamClosed(_) => ErrorKind::StreamClosed,
            TransportError::Bind { .. } => ErrorKind::Bind,
            TransportError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            TransportError::Tls(_) => ErrorKind::Tls,
        }
    }

    /// Classify a failure that ended a handshake.
    pub(crate) fn from_handshake(err: quinn::ConnectionError) -> Self {
        use quinn::ConnectionError;

        match err {
            ConnectionError::TimedOut => TransportError::Timeout(TimeoutPhase::Handshake),
            ConnectionError::TransportError(e) if is_crypto(e.code) => {
                TransportError::Handshake(e.to_string())
            }
            ConnectionError::ConnectionClosed(close) if is_crypto(close.error_code) => {
                TransportError::Handshake(close.to_string())
            }
            ConnectionError::LocallyClosed => TransportError::ConnectionClosed,
            other => TransportError::Connection(other.to_string()),
        }
    }

    /// Classify a failure on an established connection.
    pub(crate) fn from_connection(err: &quinn::ConnectionError) -> Self {
        use quinn::ConnectionError;

        match err {
            ConnectionError::LocallyClosed | ConnectionError::ApplicationClosed(_) => {
                TransportError::ConnectionClosed
            }
            ConnectionError::TimedOut => TransportError::Timeout(TimeoutPhase::Idle),
            other => TransportError::Connection(other.to_string()),
        }
    }

    pub(crate) fn from_connect(err: quinn::ConnectError) -> Self {
        match err {
            quinn::ConnectError::InvalidServerName(name) => {
                TransportError::Handshake(format!("invalid server name {name:?}"))
            }
            quinn::ConnectError::EndpointStopping => TransportError::ConnectionClosed,
            other => TransportError::Connection(other.to_string()),
        }
    }
}

/// TLS alerts travel as QUIC transport codes 0x0100..=0x01ff (RFC 9001 §4.8).
fn is_crypto(code: quinn::TransportErrorCode) -> bool {
    (0x100..0x200).contains(&u64::from(code))
}

//! Transport session subsystem.
//!
//! # Data Flow
//! ```text
//! Client:
//!     session.rs (Dialer: own UDP endpoint, first flight)
//!     → connection.rs (handshake: keys, certificate, ALPN)
//!     → stream.rs (open, write, half-close, read)
//!     → connection.rs (flush, close, drain)
//!
//! Server:
//!     listener.rs (accept loop, connection limits)
//!     → connection.rs (handshake, stream registry)
//!     → Hand off to exchange layer
//!
//! Connection States:
//!     Idle → Handshaking → Established → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Packet framing, recovery and TLS records are quinn's job
//! - Handles are created before the handshake so their state is observable
//! - Every failure is surfaced as a `TransportError`; nothing is retried here

pub mod alpn;
pub mod connection;
pub mod error;
pub mod listener;
pub mod session;
pub mod settings;
pub mod stream;
pub mod tls;

pub use connection::{Connection, ConnectionId, ConnectionState, ConnectionTracker, Role};
pub use error::{ErrorKind, TimeoutPhase, TransportError, TransportResult};
pub use listener::{accept, Listener};
pub use session::{connect, Connecting, Dialer};
pub use settings::TransportSettings;
pub use stream::{SideState, Stream, StreamId};
pub use tls::{Identity, TlsError, TrustAnchor};

//! QUIC request/response exchange library.

pub mod config;
pub mod exchange;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ExchangeConfig;
pub use exchange::{run_client, run_server, EchoHandler, Handler, Server};
pub use lifecycle::Shutdown;
pub use net::{Connection, Stream, TransportError};

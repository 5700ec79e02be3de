//! Request driver: the client and server roles on top of the transport.
//!
//! # Data Flow
//! ```text
//! Client:
//!     run_client → Dialer::connect → open_stream
//!     → write(payload) → read response → close
//!
//! Server:
//!     Server::run → Listener::accept → per-connection task
//!     → accept_stream → Handler per request (Delivery::Whole)
//!                     → Handler per chunk   (Delivery::Chunked) → write(.., eos)
//! ```
//!
//! # Design Decisions
//! - One stream carries one request and one response
//! - Chunked handlers answer before the request ends, so the client drains
//!   responses while it is still writing
//! - A failed connection never affects the accept loop or its siblings

pub mod client;
pub mod handler;
pub mod server;

pub use crate::config::ExchangeMode;
pub use client::{exchange, run_client, ClientOptions};
pub use handler::{Delivery, EchoHandler, Handler, RequestContext, ServerStats};
pub use server::{run_server, Server, ServerOptions};

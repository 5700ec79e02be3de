//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Load certificates → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close connections → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then certificates, then listeners
//! - Ordered shutdown: stop accept, close, drain
//! - Shutdown has timeout: drain is bounded by the drain deadline

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;

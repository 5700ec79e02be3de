//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events with connection/stream ids)
//!     → metrics.rs (counters, gauges)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Connection ID flows through all log events of a connection
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, windows > 0, limits > 0)
//! - Check addresses parse and ALPN names fit the wire encoding
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ExchangeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::Semaphore;

use crate::config::schema::ExchangeConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate every section, collecting all errors.
pub fn validate_config(config: &ExchangeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_address(&mut errors, "client.server_address", &config.client.server_address);

    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    } else if config.listener.max_connections > Semaphore::MAX_PERMITS {
        errors.push(ValidationError::new(
            "listener.max_connections",
            format!("must be at most {}", Semaphore::MAX_PERMITS),
        ));
    }
    if config.listener.max_request_bytes == 0 {
        errors.push(ValidationError::new("listener.max_request_bytes", "must be greater than 0"));
    }
    if config.client.server_name.is_empty() {
        errors.push(ValidationError::new("client.server_name", "must not be empty"));
    }

    let transport = &config.transport;
    if transport.alpn_protocols.is_empty() {
        errors.push(ValidationError::new("transport.alpn_protocols", "must list at least one protocol"));
    }
    for protocol in &transport.alpn_protocols {
        if protocol.is_empty() || protocol.len() > 255 {
            errors.push(ValidationError::new(
                "transport.alpn_protocols",
                format!("{protocol:?} must be 1 to 255 bytes"),
            ));
        }
    }

    let positive = [
        ("transport.handshake_timeout_ms", transport.handshake_timeout_ms),
        ("transport.idle_timeout_ms", transport.idle_timeout_ms),
        ("transport.drain_timeout_ms", transport.drain_timeout_ms),
        ("transport.stream_receive_window", u64::from(transport.stream_receive_window)),
        ("transport.connection_receive_window", u64::from(transport.connection_receive_window)),
        ("transport.max_concurrent_bidi_streams", u64::from(transport.max_concurrent_bidi_streams)),
        ("transport.read_chunk_size", transport.read_chunk_size as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if !matches!(
        config.observability.log_level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("{value:?} is not a socket address")));
    }
}

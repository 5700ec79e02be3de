//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both roles.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Server-side listener (bind address, identity).
    pub listener: ListenerConfig,

    /// Client-side target and payload.
    pub client: ClientConfig,

    /// Transport tuning shared by both roles.
    pub transport: TransportConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:6666").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Largest request accepted on one stream, in bytes.
    pub max_request_bytes: usize,

    /// Path to the identity certificate chain (PEM).
    pub cert_path: Option<String>,

    /// Path to the identity private key (PEM).
    pub key_path: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:6666".to_string(),
            max_connections: 1024,
            max_request_bytes: 1024 * 1024,
            cert_path: None,
            key_path: None,
        }
    }
}

/// How the client drives its single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeMode {
    /// Send the payload with end-of-stream, read until the peer half-closes.
    #[default]
    Request,
    /// Send the payload keeping the stream open, read the first chunk back,
    /// then half-close.
    Interactive,
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address (e.g., "127.0.0.1:6666").
    pub server_address: String,

    /// Name expected in the server certificate.
    pub server_name: String,

    /// Path to the trust anchor bundle (PEM).
    pub ca_path: Option<String>,

    /// Payload sent on the stream.
    pub payload: String,

    pub mode: ExchangeMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:6666".to_string(),
            server_name: "localhost".to_string(),
            ca_path: None,
            payload: "Hello World!".to_string(),
            mode: ExchangeMode::Request,
        }
    }
}

/// Transport configuration for both roles.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// ALPN protocol names, in preference order.
    pub alpn_protocols: Vec<String>,

    /// Handshake deadline in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,

    /// Upper bound for flushing and draining on close, in milliseconds.
    pub drain_timeout_ms: u64,

    /// Per-stream receive window in bytes.
    pub stream_receive_window: u32,

    /// Per-connection receive window in bytes.
    pub connection_receive_window: u32,

    /// Streams a peer may have open at once.
    pub max_concurrent_bidi_streams: u32,

    /// Bytes requested per read while accumulating a stream.
    pub read_chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            alpn_protocols: vec!["h3".to_string(), "hq-interop".to_string()],
            handshake_timeout_ms: 2000,
            idle_timeout_ms: 30_000,
            drain_timeout_ms: 1000,
            stream_receive_window: 256 * 1024,
            connection_receive_window: 10 * 1024 * 1024,
            max_concurrent_bidi_streams: 100,
            read_chunk_size: 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Serve Prometheus metrics over HTTP.
    pub metrics_enabled: bool,

    /// Metrics endpoint address (e.g., "127.0.0.1:9090").
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

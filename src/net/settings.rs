//! Runtime transport tuning derived from configuration.

use std::sync::Arc;
use std::time::Duration;

use quinn::{IdleTimeout, VarInt};

use crate::config::TransportConfig;
use crate::net::alpn;

/// Knobs shared by every connection of one endpoint.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// ALPN identifiers, in preference order.
    pub alpn_protocols: Vec<Vec<u8>>,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    /// Upper bound on flushing and draining during close.
    pub drain_timeout: Duration,
    pub stream_receive_window: u32,
    pub connection_receive_window: u32,
    pub max_concurrent_bidi_streams: u32,
    /// Read size used when accumulating a whole stream.
    pub read_chunk_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for TransportSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            alpn_protocols: alpn::encode(&config.alpn_protocols),
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            stream_receive_window: config.stream_receive_window,
            connection_receive_window: config.connection_receive_window,
            max_concurrent_bidi_streams: config.max_concurrent_bidi_streams,
            read_chunk_size: config.read_chunk_size,
        }
    }
}

impl TransportSettings {
    /// Replace the ALPN list.
    pub fn with_alpn<S: AsRef<str>>(mut self, protocols: &[S]) -> Self {
        self.alpn_protocols = alpn::encode(protocols);
        self
    }

    pub(crate) fn quic_transport(&self) -> Arc<quinn::TransportConfig> {
        let idle_ms = u32::try_from(self.idle_timeout.as_millis()).unwrap_or(u32::MAX);

        let mut transport = quinn::TransportConfig::default();
        transport
            .max_idle_timeout(Some(IdleTimeout::from(VarInt::from_u32(idle_ms))))
            .stream_receive_window(VarInt::from_u32(self.stream_receive_window))
            .receive_window(VarInt::from_u32(self.connection_receive_window))
            .max_concurrent_bidi_streams(VarInt::from_u32(self.max_concurrent_bidi_streams));
        Arc::new(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_config_defaults() {
        let settings = TransportSettings::default();
        assert_eq!(settings.handshake_timeout, Duration::from_secs(2));
        assert_eq!(settings.alpn_protocols[0], b"h3".to_vec());
        assert_eq!(settings.read_chunk_size, 1024);
    }

    #[test]
    fn with_alpn_replaces_list() {
        let settings = TransportSettings::default().with_alpn(&["echo"]);
        assert_eq!(settings.alpn_protocols, vec![b"echo".to_vec()]);
    }
}

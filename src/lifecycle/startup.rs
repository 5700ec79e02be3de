//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve addresses from validated configuration
//! - Load certificate material once, before any socket is bound
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::{ClientConfig, ListenerConfig};
use crate::net::{Identity, TlsError, TrustAnchor};

/// Problems that stop the process before any traffic flows.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{field} is required")]
    Missing { field: &'static str },

    #[error("{field}: {value:?} is not a socket address")]
    Address { field: &'static str, value: String },

    #[error(transparent)]
    Tls(#[from] TlsError),
}

pub fn bind_address(config: &ListenerConfig) -> Result<SocketAddr, StartupError> {
    parse_address("listener.bind_address", &config.bind_address)
}

pub fn server_address(config: &ClientConfig) -> Result<SocketAddr, StartupError> {
    parse_address("client.server_address", &config.server_address)
}

/// Load the server identity named by the listener section.
pub fn load_identity(config: &ListenerConfig) -> Result<Identity, StartupError> {
    let cert = config
        .cert_path
        .as_deref()
        .ok_or(StartupError::Missing { field: "listener.cert_path" })?;
    let key = config
        .key_path
        .as_deref()
        .ok_or(StartupError::Missing { field: "listener.key_path" })?;

    let identity = Identity::from_pem_files(Path::new(cert), Path::new(key))?;
    tracing::info!(cert_path = %cert, chain_len = identity.chain().len(), "Identity loaded");
    Ok(identity)
}

/// Load the trust anchor named by the client section.
pub fn load_trust_anchor(config: &ClientConfig) -> Result<TrustAnchor, StartupError> {
    let path = config
        .ca_path
        .as_deref()
        .ok_or(StartupError::Missing { field: "client.ca_path" })?;

    let anchor = TrustAnchor::from_pem_file(Path::new(path))?;
    tracing::info!(ca_path = %path, roots = anchor.len(), "Trust anchor loaded");
    Ok(anchor)
}

fn parse_address(field: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::Address {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_paths_are_reported() {
        let err = load_identity(&ListenerConfig::default()).unwrap_err();
        assert!(matches!(err, StartupError::Missing { field: "listener.cert_path" }));

        let err = load_trust_anchor(&ClientConfig::default()).unwrap_err();
        assert!(matches!(err, StartupError::Missing { field: "client.ca_path" }));
    }

    #[test]
    fn unreadable_identity_is_tls_error() {
        let config = ListenerConfig {
            cert_path: Some("/nonexistent/cert.pem".into()),
            key_path: Some("/nonexistent/key.pem".into()),
            ..ListenerConfig::default()
        };
        assert!(matches!(load_identity(&config), Err(StartupError::Tls(_))));
    }

    #[test]
    fn addresses_parse() {
        assert_eq!(
            bind_address(&ListenerConfig::default()).unwrap(),
            "127.0.0.1:6666".parse::<SocketAddr>().unwrap()
        );
        let config = ClientConfig {
            server_address: "nowhere".into(),
            ..ClientConfig::default()
        };
        assert!(matches!(server_address(&config), Err(StartupError::Address { .. })));
    }
}

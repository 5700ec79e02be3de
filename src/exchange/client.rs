//! Client role: one request/response exchange per connection.

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use crate::config::{ClientConfig, ExchangeMode};
use crate::net::{
    Connection, Dialer, ErrorKind, Role, SideState, Stream, TransportError, TransportResult,
    TransportSettings, TrustAnchor,
};
use crate::observability::metrics;

/// Per-exchange client options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Name expected in the server certificate.
    pub server_name: String,
    pub mode: ExchangeMode,
    /// Largest response accumulated before giving up.
    pub max_response_bytes: usize,
    pub settings: TransportSettings,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            mode: ExchangeMode::Request,
            max_response_bytes: 16 * 1024 * 1024,
            settings: TransportSettings::default(),
        }
    }
}

impl ClientOptions {
    pub fn from_config(client: &ClientConfig, settings: TransportSettings) -> Self {
        Self {
            server_name: client.server_name.clone(),
            mode: client.mode,
            settings,
            ..Self::default()
        }
    }
}

/// Connect, exchange `payload` on one stream and close.
///
/// The connection is closed whether or not the exchange succeeded; transport
/// failures are returned unchanged.
pub async fn run_client(
    remote: SocketAddr,
    anchor: &TrustAnchor,
    payload: &[u8],
    options: &ClientOptions,
) -> TransportResult<Bytes> {
    let dialer = Dialer::new(anchor, options.server_name.clone(), options.settings.clone())?;
    let connection = match dialer.connect(remote).await {
        Ok(connection) => connection,
        Err(e) => {
            if e.kind() == ErrorKind::Handshake {
                metrics::record_handshake_failure(Role::Client);
            }
            tracing::warn!(remote = %remote, error = %e, "Connect failed");
            return Err(e);
        }
    };

    tracing::info!(
        connection_id = %connection.id(),
        remote = %remote,
        mode = ?options.mode,
        "Connected"
    );

    let result = exchange(&connection, payload, options).await;
    connection.close().await;

    match &result {
        Ok(response) => tracing::info!(
            connection_id = %connection.id(),
            response_bytes = response.len(),
            "Exchange complete"
        ),
        Err(e) => tracing::warn!(connection_id = %connection.id(), error = %e, "Exchange failed"),
    }
    result
}

/// Run one exchange on an already established connection.
pub async fn exchange(
    connection: &Connection,
    payload: &[u8],
    options: &ClientOptions,
) -> TransportResult<Bytes> {
    let mut stream = connection.open_stream().await?;
    let chunk = options.settings.read_chunk_size;

    let response = match options.mode {
        ExchangeMode::Request => {
            send_and_collect(&mut stream, payload, chunk, options.max_response_bytes).await?
        }
        ExchangeMode::Interactive => {
            stream.write(payload, false).await?;
            first_chunk(&mut stream, chunk).await?
        }
    };

    if stream.write_state() == SideState::Open {
        stream.finish()?;
    }
    Ok(response)
}

/// Write `payload` with end-of-stream and read the response to its end.
///
/// Bytes the peer already sent are drained between writes, so a peer that
/// answers while still reading never stalls on flow control.
async fn send_and_collect(
    stream: &mut Stream,
    payload: &[u8],
    chunk: usize,
    limit: usize,
) -> TransportResult<Bytes> {
    let mut response = BytesMut::new();
    let mut peer_done = false;

    for piece in payload.chunks(chunk.max(1)) {
        stream.write(piece, false).await?;
        while !peer_done {
            let (bytes, end_of_stream) = stream.try_read(chunk)?;
            if bytes.is_empty() && !end_of_stream {
                break;
            }
            collect(&mut response, &bytes, limit)?;
            peer_done = end_of_stream;
        }
    }
    stream.finish()?;

    while !peer_done {
        let (bytes, end_of_stream) = stream.read(chunk).await?;
        collect(&mut response, &bytes, limit)?;
        peer_done = end_of_stream;
    }
    Ok(response.freeze())
}

fn collect(response: &mut BytesMut, bytes: &[u8], limit: usize) -> TransportResult<()> {
    if response.len() + bytes.len() > limit {
        return Err(TransportError::PayloadTooLarge { limit });
    }
    response.extend_from_slice(bytes);
    Ok(())
}

/// Wait for the first non-empty read, or the peer's end-of-stream.
async fn first_chunk(stream: &mut Stream, chunk: usize) -> TransportResult<Bytes> {
    let mut buffer = BytesMut::new();
    loop {
        let (bytes, end_of_stream) = stream.read(chunk).await?;
        buffer.extend_from_slice(&bytes);
        if !buffer.is_empty() || end_of_stream {
            return Ok(buffer.freeze());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_client_section() {
        let client = ClientConfig {
            server_name: "echo.test".into(),
            mode: ExchangeMode::Interactive,
            ..ClientConfig::default()
        };
        let options = ClientOptions::from_config(&client, TransportSettings::default());
        assert_eq!(options.server_name, "echo.test");
        assert_eq!(options.mode, ExchangeMode::Interactive);
        assert_eq!(options.max_response_bytes, ClientOptions::default().max_response_bytes);
    }
}

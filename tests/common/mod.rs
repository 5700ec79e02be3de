//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use quic_exchange::exchange::{Handler, Server, ServerOptions, ServerStats};
use quic_exchange::net::{ConnectionTracker, Identity, TransportSettings, TrustAnchor};
use quic_exchange::Shutdown;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Throwaway certificate material written as PEM files.
pub struct TestPki {
    _dir: TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl TestPki {
    /// Self-signed certificate for `localhost`.
    pub fn generate() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, generated.cert.pem()).unwrap();
        std::fs::write(&key_path, generated.key_pair.serialize_pem()).unwrap();
        Self {
            _dir: dir,
            cert_path,
            key_path,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::from_pem_files(&self.cert_path, &self.key_path).unwrap()
    }

    /// Trust anchor that accepts this identity.
    pub fn anchor(&self) -> TrustAnchor {
        TrustAnchor::from_pem_file(&self.cert_path).unwrap()
    }
}

/// Transport settings with short deadlines for tests.
pub fn test_settings() -> TransportSettings {
    TransportSettings {
        handshake_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(5),
        drain_timeout: Duration::from_millis(500),
        ..TransportSettings::default()
    }
}

pub fn server_options() -> ServerOptions {
    ServerOptions {
        settings: test_settings(),
        ..ServerOptions::default()
    }
}

/// A server running on its own task.
pub struct TestServer {
    pub addr: SocketAddr,
    pub stats: Arc<ServerStats>,
    pub tracker: ConnectionTracker,
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Signal shutdown and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap();
    }
}

/// Bind a server on an ephemeral localhost port and run it.
pub fn start_server<H: Handler>(pki: &TestPki, handler: H, options: ServerOptions) -> TestServer {
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::bind(bind, &pki.identity(), options, handler).unwrap();
    let addr = server.local_addr().unwrap();
    let stats = server.stats();
    let tracker = server.tracker();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let handle = tokio::spawn(server.run(signal));

    TestServer {
        addr,
        stats,
        tracker,
        shutdown,
        handle,
    }
}

/// Poll `condition` until it holds or the timeout elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// UDP forwarder between one client and a server that can go dark.
///
/// Once blocked, datagrams in both directions are dropped, so the client's
/// peer never acknowledges anything again.
pub struct Relay {
    pub addr: SocketAddr,
    blocked: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Relay {
    pub async fn start(server: SocketAddr) -> Self {
        let front = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let back = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        back.connect(server).await.unwrap();
        let addr = front.local_addr().unwrap();
        let blocked = Arc::new(AtomicBool::new(false));

        let dropping = Arc::clone(&blocked);
        let task = tokio::spawn(async move {
            let mut client: Option<SocketAddr> = None;
            let mut inbound = [0u8; 65536];
            let mut outbound = [0u8; 65536];
            loop {
                tokio::select! {
                    Ok((len, from)) = front.recv_from(&mut inbound) => {
                        client = Some(from);
                        if !dropping.load(Ordering::SeqCst) {
                            let _ = back.send(&inbound[..len]).await;
                        }
                    }
                    Ok(len) = back.recv(&mut outbound) => {
                        if let (Some(to), false) = (client, dropping.load(Ordering::SeqCst)) {
                            let _ = front.send_to(&outbound[..len], to).await;
                        }
                    }
                    else => break,
                }
            }
        });

        Self {
            addr,
            blocked,
            task,
        }
    }

    /// Drop all traffic from now on.
    pub fn block(&self) {
        self.blocked.store(true, Ordering::SeqCst);
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

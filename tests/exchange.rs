//! End-to-end request/response tests through the client and server drivers.

mod common;

use std::net::UdpSocket;
use std::time::Duration;

use bytes::Bytes;
use common::{eventually, server_options, start_server, test_settings, TestPki};
use quic_exchange::exchange::{
    exchange, run_client, run_server, ClientOptions, EchoHandler, ExchangeMode, Handler,
    RequestContext, ServerOptions,
};
use quic_exchange::net::{Dialer, ErrorKind, Identity, SideState, TransportError, TransportSettings};
use quic_exchange::Shutdown;

fn client_options() -> ClientOptions {
    ClientOptions {
        settings: test_settings(),
        ..ClientOptions::default()
    }
}

#[tokio::test]
async fn hello_world_is_echoed() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let response = run_client(server.addr, &pki.anchor(), b"Hello World!", &client_options())
        .await
        .unwrap();

    assert_eq!(&response[..], b"Hello World!");
    assert_eq!(server.stats.requests(), 1);
    server.stop().await;
}

#[tokio::test]
async fn echo_returns_payload_for_many_sizes() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());
    let anchor = pki.anchor();

    for size in [0usize, 1, 1023, 1024, 1025, 64 * 1024, 300 * 1024] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let response = run_client(server.addr, &anchor, &payload, &client_options())
            .await
            .unwrap();
        assert_eq!(response.len(), size, "size {size}");
        assert_eq!(&response[..], &payload[..], "size {size}");
    }

    server.stop().await;
}

#[tokio::test]
async fn handler_sees_request_numbers_across_connections() {
    let pki = TestPki::generate();

    struct Numbering;
    impl Handler for Numbering {
        fn handle(&self, context: &RequestContext, _request: Bytes) -> Bytes {
            Bytes::from(context.request_number.to_string())
        }
    }

    let server = start_server(&pki, Numbering, server_options());
    let anchor = pki.anchor();

    for expected in 1..=3u64 {
        let response = run_client(server.addr, &anchor, b"n", &client_options())
            .await
            .unwrap();
        assert_eq!(response, Bytes::from(expected.to_string()));
    }
    assert_eq!(server.stats.connections(), 3);
    server.stop().await;
}

#[tokio::test]
async fn closure_handlers_transform_requests() {
    let pki = TestPki::generate();
    let server = start_server(
        &pki,
        |request: Bytes| Bytes::from(request.to_ascii_uppercase()),
        server_options(),
    );

    let response = run_client(server.addr, &pki.anchor(), b"quiet", &client_options())
        .await
        .unwrap();
    assert_eq!(&response[..], b"QUIET");
    server.stop().await;
}

#[tokio::test]
async fn untrusted_server_fails_handshake() {
    let pki = TestPki::generate();
    let stranger = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let err = run_client(server.addr, &stranger.anchor(), b"hi", &client_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);

    assert_eq!(server.stats.requests(), 0);
    server.stop().await;
}

#[tokio::test]
async fn failed_handshake_does_not_stop_server() {
    let pki = TestPki::generate();
    let stranger = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    // Garbage datagrams are dropped by the endpoint.
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(&[0xde, 0xad, 0xbe, 0xef], server.addr).unwrap();
    socket.send_to(&[0u8; 1200], server.addr).unwrap();

    let err = run_client(server.addr, &stranger.anchor(), b"first", &client_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);

    let response = run_client(server.addr, &pki.anchor(), b"second", &client_options())
        .await
        .unwrap();
    assert_eq!(&response[..], b"second");

    let stats = server.stats.clone();
    assert!(eventually(Duration::from_secs(2), || stats.handshake_failures() >= 1).await);
    assert_eq!(stats.requests(), 1);
    server.stop().await;
}

#[tokio::test]
async fn alpn_mismatch_fails_handshake() {
    let pki = TestPki::generate();
    let options = ServerOptions {
        settings: test_settings().with_alpn(&["echo/1"]),
        ..server_options()
    };
    let server = start_server(&pki, EchoHandler, options);

    let err = run_client(server.addr, &pki.anchor(), b"hi", &client_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);
    server.stop().await;
}

#[tokio::test]
async fn shared_alpn_order_negotiates_first_entry() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let dialer = Dialer::new(&pki.anchor(), "localhost", test_settings()).unwrap();
    let connection = dialer.connect(server.addr).await.unwrap();
    assert_eq!(connection.protocol(), Some(&b"h3"[..]));

    connection.close().await;
    server.stop().await;
}

#[tokio::test]
async fn alpn_order_disagreement_follows_server_preference() {
    let pki = TestPki::generate();
    let options = ServerOptions {
        settings: test_settings().with_alpn(&["hq-interop", "h3"]),
        ..server_options()
    };
    let server = start_server(&pki, EchoHandler, options);

    // The client offers ["h3", "hq-interop"]; rustls picks in server order.
    let client = test_settings();
    let dialer = Dialer::new(&pki.anchor(), "localhost", client.clone()).unwrap();
    let connection = dialer.connect(server.addr).await.unwrap();
    let negotiated = connection.protocol().unwrap().to_vec();
    assert_eq!(negotiated, b"hq-interop".to_vec());
    assert!(client.alpn_protocols.contains(&negotiated));

    connection.close().await;
    server.stop().await;
}

#[tokio::test]
async fn oversized_request_is_reset() {
    let pki = TestPki::generate();
    let options = ServerOptions {
        max_request_bytes: 16,
        ..server_options()
    };
    let server = start_server(&pki, EchoHandler, options);

    let err = run_client(server.addr, &pki.anchor(), &[7u8; 64], &client_options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamClosed);
    assert_eq!(server.stats.requests(), 0);
    server.stop().await;
}

#[tokio::test]
async fn interactive_mode_reads_first_chunk_from_echo_server() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let options = ClientOptions {
        mode: ExchangeMode::Interactive,
        ..client_options()
    };
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        run_client(server.addr, &pki.anchor(), b"Hello World!", &options),
    )
    .await
    .expect("echo server answered before end-of-stream")
    .unwrap();
    assert_eq!(&response[..], b"Hello World!");

    let stats = server.stats.clone();
    assert!(eventually(Duration::from_secs(2), || stats.requests() == 1).await);
    server.stop().await;
}

#[tokio::test]
async fn finished_streams_are_reaped_while_connection_stays_open() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let dialer = Dialer::new(&pki.anchor(), "localhost", test_settings()).unwrap();
    let connection = dialer.connect(server.addr).await.unwrap();
    for round in 0..20u32 {
        let payload = round.to_string();
        let response = exchange(&connection, payload.as_bytes(), &client_options())
            .await
            .unwrap();
        assert_eq!(&response[..], payload.as_bytes());
    }

    let stats = server.stats.clone();
    assert!(eventually(Duration::from_secs(2), || stats.active_streams() == 0).await);
    assert_eq!(stats.requests(), 20);
    assert_eq!(server.tracker.active_count(), 1);

    connection.close().await;
    server.stop().await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let dialer = Dialer::new(&pki.anchor(), "localhost", test_settings()).unwrap();
    let connection = dialer.connect(server.addr).await.unwrap();
    let tracker = server.tracker.clone();
    assert!(eventually(Duration::from_secs(2), || tracker.active_count() == 1).await);

    let mut stream = connection.open_stream().await.unwrap();
    stream.write(b"pending", false).await.unwrap();

    server.stop().await;

    let err = stream.read(1024).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);
    assert_eq!(tracker.active_count(), 0);
    connection.close().await;
}

#[tokio::test]
async fn run_server_reports_address_in_use() {
    let pki = TestPki::generate();
    let taken = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let err = run_server(
        addr,
        &pki.identity(),
        EchoHandler,
        server_options(),
        Shutdown::new().subscribe(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TransportError::Bind { addr: a, .. } if a == addr));
}

#[tokio::test]
async fn run_server_stops_on_shutdown() {
    let pki = TestPki::generate();
    let identity: Identity = pki.identity();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();

    let task = tokio::spawn(async move {
        run_server(
            "127.0.0.1:0".parse().unwrap(),
            &identity,
            EchoHandler,
            server_options(),
            signal,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shutdown.trigger(), 1);
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn exchange_leaves_stream_closed_after_connection_close() {
    let pki = TestPki::generate();
    let server = start_server(&pki, EchoHandler, server_options());

    let settings: TransportSettings = test_settings();
    let dialer = Dialer::new(&pki.anchor(), "localhost", settings).unwrap();
    let connection = dialer.connect(server.addr).await.unwrap();

    let mut stream = connection.open_stream().await.unwrap();
    stream.write(b"Hello World!", true).await.unwrap();
    let response = stream.read_to_end(1024, 1024).await.unwrap();
    assert_eq!(&response[..], b"Hello World!");
    assert_eq!(stream.write_state(), SideState::HalfClosed);
    assert_eq!(stream.read_state(), SideState::HalfClosed);
    assert!(stream.is_closed());

    connection.close().await;
    assert_eq!(stream.write_state(), SideState::Closed);
    assert_eq!(stream.read_state(), SideState::Closed);
    server.stop().await;
}

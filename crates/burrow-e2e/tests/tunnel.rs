//! Plain-HTTP tunnel end-to-end tests

use std::io::Cursor;
use std::time::Duration;

use burrow::{open_tunnel, relay, MasterAddress, RelayReport, TrustOptions, TunnelError};
use burrow_e2e::{MockProxy, ProxyMode};
use hyper::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;

/// Initialize tracing and crypto provider for tests
fn init_test() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let _ = tracing_subscriber::fmt()
        .with_env_filter("burrow=debug,burrow_common=debug,burrow_e2e=debug")
        .with_test_writer()
        .try_init();
}

/// Relay `input` through `tunnel` and collect everything written locally
async fn relay_collect<T>(tunnel: T, input: Vec<u8>) -> (RelayReport, Vec<u8>)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (local_out, mut collector) = tokio::io::duplex(8192);
    let reader = tokio::spawn(async move {
        let mut output = Vec::new();
        collector.read_to_end(&mut output).await.unwrap();
        output
    });

    let report = relay(tunnel, Cursor::new(input), local_out).await;
    (report, reader.await.unwrap())
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_plain_tunnel_echo_round_trip() {
    init_test();

    let proxy = MockProxy::start(ProxyMode::Echo).await;
    let master = MasterAddress::parse(&proxy.master_url()).unwrap();

    let tunnel = open_tunnel(&master, "shell-1234:22", &TrustOptions::default())
        .await
        .expect("Failed to open tunnel");

    // Several chunks' worth, plus a partial one.
    let payload = patterned(5 * 4096 + 123);
    let (report, output) = relay_collect(tunnel, payload.clone()).await;

    assert!(report.is_clean(), "unexpected relay report: {:?}", report);
    assert_eq!(report.outbound.bytes, payload.len() as u64);
    assert_eq!(report.inbound.bytes, payload.len() as u64);
    assert_eq!(output, payload);

    let stats = proxy.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.connect_targets, vec!["shell-1234:22".to_string()]);
    assert_eq!(stats.tunnel_bytes, payload);
}

#[tokio::test]
async fn test_local_eof_does_not_stop_inbound() {
    init_test();

    let proxy = MockProxy::start(ProxyMode::DrainThenSend(b"goodbye after eof".to_vec())).await;
    let master = MasterAddress::parse(&proxy.master_url()).unwrap();

    let tunnel = open_tunnel(&master, "svc", &TrustOptions::default())
        .await
        .expect("Failed to open tunnel");

    let (local_out, mut collector) = tokio::io::duplex(8192);
    let report = relay(tunnel, tokio::io::empty(), local_out).await;

    let mut output = Vec::new();
    collector.read_to_end(&mut output).await.unwrap();

    assert!(report.is_clean(), "unexpected relay report: {:?}", report);
    assert_eq!(report.outbound.bytes, 0);
    assert_eq!(output, b"goodbye after eof");
    assert_eq!(proxy.stats().client_eofs, 1);
}

#[tokio::test]
async fn test_rejected_connect() {
    init_test();

    let proxy = MockProxy::start(ProxyMode::Reject(StatusCode::FORBIDDEN)).await;
    let master = MasterAddress::parse(&proxy.master_url()).unwrap();

    match open_tunnel(&master, "svc:22", &TrustOptions::default()).await {
        Err(TunnelError::TunnelEstablish(msg)) => assert!(msg.contains("403"), "{}", msg),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("tunnel established despite 403"),
    }

    let stats = proxy.stats();
    assert_eq!(stats.connect_targets, vec!["svc:22".to_string()]);
    assert!(stats.tunnel_bytes.is_empty());
}

#[tokio::test]
async fn test_double_close_on_real_tunnel() {
    init_test();

    let proxy = MockProxy::start(ProxyMode::Echo).await;
    let master = MasterAddress::parse(&proxy.master_url()).unwrap();

    let mut tunnel = open_tunnel(&master, "svc:22", &TrustOptions::default())
        .await
        .expect("Failed to open tunnel");

    burrow::close_quietly(&mut tunnel, "tunnel").await;
    burrow::close_quietly(&mut tunnel, "tunnel").await;

    // The mock sees the half-close and closes its side.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), tunnel.read_to_end(&mut rest))
        .await
        .expect("tunnel did not close")
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_refused_port() {
    init_test();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let master = MasterAddress::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
    let result = open_tunnel(&master, "svc:22", &TrustOptions::default()).await;

    assert!(matches!(result, Err(TunnelError::Connect { .. })));
}

#[tokio::test]
async fn test_unresolvable_master() {
    init_test();

    let master = MasterAddress::parse("http://nonexistent.invalid:1").unwrap();
    let result = open_tunnel(&master, "svc:22", &TrustOptions::default()).await;

    match result {
        Err(TunnelError::Connect { addr, .. }) => assert_eq!(addr, "nonexistent.invalid:1"),
        Err(other) => panic!("unexpected error: {:?}", other),
        Ok(_) => panic!("connected to an unresolvable host"),
    }
}

#[tokio::test]
async fn test_invalid_target_sends_nothing() {
    init_test();

    let proxy = MockProxy::start(ProxyMode::Echo).await;
    let master = MasterAddress::parse(&proxy.master_url()).unwrap();

    let result = open_tunnel(&master, "http://svc:22", &TrustOptions::default()).await;
    assert!(matches!(result, Err(TunnelError::Config(_))));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(proxy.stats().connections, 0);
}

#[test]
fn test_malformed_master_addresses() {
    for addr in ["", "ftp://master:21", "http://", "http://master:0", "master:notaport"] {
        assert!(
            matches!(MasterAddress::parse(addr), Err(TunnelError::Config(_))),
            "expected config error for {:?}",
            addr
        );
    }
}

//! Mock master for E2E tests
//!
//! Accepts HTTP/1.1 CONNECT requests, optionally behind TLS, and then plays
//! the remote service on the upgraded connection according to a
//! [`ProxyMode`]. Everything it sees is recorded for assertions.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use crate::certificates::TestCertificates;

/// What the mock does with a CONNECT request
#[derive(Clone, Debug)]
pub enum ProxyMode {
    /// Grant the tunnel and echo every byte back
    Echo,
    /// Answer with this status and no tunnel
    Reject(StatusCode),
    /// Grant the tunnel, read until the client half-closes, then send the
    /// payload and close
    DrainThenSend(Vec<u8>),
}

/// What the mock has seen so far
#[derive(Clone, Debug, Default)]
pub struct ProxyStats {
    /// TCP connections accepted
    pub connections: usize,
    /// TLS handshakes that failed
    pub tls_failures: usize,
    /// Targets of CONNECT requests, in arrival order
    pub connect_targets: Vec<String>,
    /// Bytes received inside granted tunnels
    pub tunnel_bytes: Vec<u8>,
    /// Tunnels whose client side reached end-of-stream
    pub client_eofs: usize,
}

/// A running mock master
pub struct MockProxy {
    addr: SocketAddr,
    tls: bool,
    stats: Arc<RwLock<ProxyStats>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockProxy {
    /// Start a plain-HTTP mock on an ephemeral port
    pub async fn start(mode: ProxyMode) -> Self {
        Self::spawn(mode, None).await
    }

    /// Start a TLS mock serving the master certificate from `certs`
    pub async fn start_tls(mode: ProxyMode, certs: &TestCertificates) -> Self {
        let config =
            burrow_common::load_server_config_from_pem(&certs.server_cert_pem, &certs.server_key_pem)
                .expect("Failed to load server TLS config");
        Self::spawn(mode, Some(TlsAcceptor::from(Arc::new(config)))).await
    }

    async fn spawn(mode: ProxyMode, tls_acceptor: Option<TlsAcceptor>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock proxy");
        let addr = listener.local_addr().unwrap();

        let stats = Arc::new(RwLock::new(ProxyStats::default()));
        let tls = tls_acceptor.is_some();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let stats_clone = stats.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Mock proxy shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        let (stream, peer_addr) = match result {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::error!("Mock proxy accept error: {}", e);
                                break;
                            }
                        };
                        stats_clone.write().connections += 1;

                        let stats = stats_clone.clone();
                        let mode = mode.clone();
                        let acceptor = tls_acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        serve_connection(tls_stream, peer_addr, mode, stats).await
                                    }
                                    Err(e) => {
                                        tracing::debug!("TLS handshake from {} failed: {}", peer_addr, e);
                                        stats.write().tls_failures += 1;
                                    }
                                },
                                None => serve_connection(stream, peer_addr, mode, stats).await,
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            tls,
            stats,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Master address for this mock, e.g. `https://127.0.0.1:41234`
    pub fn master_url(&self) -> String {
        self.master_url_with_host("127.0.0.1")
    }

    /// Master address using `host` in place of the loopback IP
    pub fn master_url_with_host(&self, host: &str) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, host, self.addr.port())
    }

    /// Snapshot of everything recorded so far
    pub fn stats(&self) -> ProxyStats {
        self.stats.read().clone()
    }

    /// Shutdown the mock
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    mode: ProxyMode,
    stats: Arc<RwLock<ProxyStats>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| handle_request(req, mode.clone(), stats.clone()));

    if let Err(e) = http1::Builder::new()
        .serve_connection(io, service)
        .with_upgrades()
        .await
    {
        tracing::debug!("Mock proxy connection from {} ended: {}", peer_addr, e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    mode: ProxyMode,
    stats: Arc<RwLock<ProxyStats>>,
) -> Result<Response<Empty<Bytes>>, Infallible> {
    if req.method() != Method::CONNECT {
        return Ok(status_response(StatusCode::METHOD_NOT_ALLOWED));
    }

    let target = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_else(|| req.uri().to_string());
    tracing::debug!("Mock proxy got CONNECT {}", target);
    stats.write().connect_targets.push(target);

    if let ProxyMode::Reject(status) = mode {
        return Ok(status_response(status));
    }

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => run_tunnel(TokioIo::new(upgraded), mode, stats).await,
            Err(e) => tracing::warn!("Mock proxy upgrade failed: {}", e),
        }
    });

    Ok(Response::new(Empty::new()))
}

fn status_response(status: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    response
}

async fn run_tunnel<S>(mut stream: S, mode: ProxyMode, stats: Arc<RwLock<ProxyStats>>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                stats.write().client_eofs += 1;
                break;
            }
            Ok(n) => {
                stats.write().tunnel_bytes.extend_from_slice(&buf[..n]);
                if matches!(mode, ProxyMode::Echo) {
                    if let Err(e) = stream.write_all(&buf[..n]).await {
                        tracing::error!("Mock proxy echo write error: {}", e);
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Mock proxy tunnel read error: {}", e);
                return;
            }
        }
    }

    if let ProxyMode::DrainThenSend(payload) = &mode {
        if let Err(e) = stream.write_all(payload).await {
            tracing::error!("Mock proxy send error: {}", e);
            return;
        }
    }

    let _ = stream.shutdown().await;
}

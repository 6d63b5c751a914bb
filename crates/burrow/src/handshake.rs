use burrow_common::TunnelError;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, HOST};
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::address::MasterAddress;
use crate::connector::{Connector, TrustOptions};

/// The established tunnel: the master connection, repurposed for raw bytes
pub type TunnelChannel = TokioIo<Upgraded>;

/// Build the single CONNECT request naming `target`
fn connect_request(target: &str) -> Result<Request<Empty<Bytes>>, TunnelError> {
    let invalid = |reason: String| {
        TunnelError::Config(format!("Invalid service identifier '{}': {}", target, reason))
    };

    let uri: Uri = target.parse().map_err(|e| invalid(format!("{}", e)))?;
    if uri.scheme().is_some() || uri.authority().is_none() {
        return Err(invalid("expected host or host:port".to_string()));
    }
    let host = HeaderValue::from_str(target).map_err(|e| invalid(e.to_string()))?;

    Request::builder()
        .method(Method::CONNECT)
        .uri(uri)
        .header(HOST, host)
        .body(Empty::new())
        .map_err(|e| invalid(e.to_string()))
}

/// Ask the proxy on `stream` for a tunnel to `target`.
///
/// Exactly one CONNECT is written. A `200` answer turns the same connection
/// into the tunnel; bytes the proxy sent right after its response head are
/// kept and read first. Anything else fails with
/// [`TunnelError::TunnelEstablish`].
pub async fn establish<S>(stream: S, target: &str) -> Result<TunnelChannel, TunnelError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let request = connect_request(target)?;

    let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| TunnelError::TunnelEstablish(format!("HTTP handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.with_upgrades().await {
            tracing::debug!("Proxy connection ended: {}", e);
        }
    });

    tracing::debug!("Sending CONNECT {}", target);
    let response = sender.send_request(request).await.map_err(|e| {
        TunnelError::TunnelEstablish(format!("CONNECT {} failed: {}", target, e))
    })?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(TunnelError::TunnelEstablish(format!(
            "Proxy refused CONNECT {}: {}",
            target, status
        )));
    }

    let upgraded = hyper::upgrade::on(response).await.map_err(|e| {
        TunnelError::TunnelEstablish(format!("Tunnel upgrade failed: {}", e))
    })?;

    tracing::info!("Tunnel to {} established ({})", target, status);
    Ok(TokioIo::new(upgraded))
}

/// Connect to the master and open a tunnel to `target` through it
pub async fn open_tunnel(
    master: &MasterAddress,
    target: &str,
    trust: &TrustOptions,
) -> Result<TunnelChannel, TunnelError> {
    // Validate the target before touching the network.
    connect_request(target)?;

    let connector = Connector::new(master, trust)?;
    let stream = connector.connect().await?;
    tracing::debug!(
        "Connected to {} ({})",
        master,
        if stream.is_tls() { "tls" } else { "plain" }
    );

    establish(stream, target).await
}

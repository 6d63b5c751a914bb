use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use burrow_common::{TrustSource, TunnelError};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use crate::address::MasterAddress;

/// How the master's certificate is verified
#[derive(Debug, Clone, Default)]
pub struct TrustOptions {
    /// CA bundle; when absent the platform trust store is used
    pub ca: Option<TrustSource>,
    /// Name to verify the certificate against instead of the master host
    pub server_name: Option<String>,
}

impl TrustOptions {
    pub fn new(ca: Option<TrustSource>, server_name: Option<String>) -> Self {
        Self { ca, server_name }
    }
}

/// Connection to the master, before any CONNECT has been sent
pub enum MasterStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MasterStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, MasterStream::Tls(_))
    }
}

impl AsyncRead for MasterStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MasterStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MasterStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MasterStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MasterStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MasterStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MasterStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MasterStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MasterStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MasterStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Opens connections to the master's proxy port.
///
/// For `https` masters the TLS handshake runs on the raw socket before the
/// CONNECT request is written, so the request itself travels encrypted and
/// the certificate checked is the master's, not the tunnel target's.
pub struct Connector {
    host: String,
    port: u16,
    /// `host:port` as reported in errors, IPv6 bracketed
    authority: String,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl Connector {
    /// Prepare a connector; for secure masters this loads the trust material
    pub fn new(master: &MasterAddress, trust: &TrustOptions) -> Result<Self, TunnelError> {
        let tls = if master.is_secure() {
            let ca_pem = trust.ca.as_ref().map(TrustSource::resolve).transpose()?;
            let config = burrow_common::load_client_config(ca_pem.as_deref())?;

            let verify_name = trust.server_name.as_deref().unwrap_or(master.host());
            let server_name = ServerName::try_from(verify_name.to_string()).map_err(|_| {
                TunnelError::Config(format!("Invalid TLS server name: {}", verify_name))
            })?;

            tracing::debug!(
                "TLS to {} will verify against '{}' ({} CA)",
                master,
                verify_name,
                trust.ca.as_ref().map_or("platform", TrustSource::kind)
            );

            Some((TlsConnector::from(Arc::new(config)), server_name))
        } else {
            if trust.ca.is_some() || trust.server_name.is_some() {
                tracing::warn!("Master {} is not https; TLS options are ignored", master);
            }
            None
        };

        Ok(Self {
            host: master.host().to_string(),
            port: master.port(),
            authority: master.authority(),
            tls,
        })
    }

    /// Connect to the master and, if secure, complete the TLS handshake
    pub async fn connect(&self) -> Result<MasterStream, TunnelError> {
        let addr = self.authority.clone();
        tracing::debug!("Connecting to {}", addr);

        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| TunnelError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let Some((connector, server_name)) = &self.tls else {
            return Ok(MasterStream::Plain(stream));
        };

        // Interactive sessions send many tiny writes.
        stream
            .set_nodelay(true)
            .map_err(|source| TunnelError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let tls_stream = connector
            .connect(server_name.clone(), stream)
            .await
            .map_err(|e| TunnelError::from_handshake(server_name.to_str(), e))?;

        tracing::debug!("TLS established with {}", addr);
        Ok(MasterStream::Tls(Box::new(tls_stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_master_needs_no_tls() {
        let master = MasterAddress::parse("http://127.0.0.1:8080").unwrap();
        let connector = Connector::new(&master, &TrustOptions::default()).unwrap();
        assert!(connector.tls.is_none());
    }

    #[test]
    fn test_secure_master_uses_override_name() {
        let master = MasterAddress::parse("https://10.1.2.3:8443").unwrap();
        let trust = TrustOptions::new(None, Some("master.internal".to_string()));
        let connector = Connector::new(&master, &trust).unwrap();

        let (_, server_name) = connector.tls.as_ref().unwrap();
        assert_eq!(server_name.to_str(), "master.internal");
    }

    #[test]
    fn test_secure_master_defaults_to_host_name() {
        let master = MasterAddress::parse("https://master.example.com").unwrap();
        let connector = Connector::new(&master, &TrustOptions::default()).unwrap();

        let (_, server_name) = connector.tls.as_ref().unwrap();
        assert_eq!(server_name.to_str(), "master.example.com");
    }

    #[test]
    fn test_invalid_override_name() {
        let master = MasterAddress::parse("https://master.example.com").unwrap();
        let trust = TrustOptions::new(None, Some("not a hostname!".to_string()));
        assert!(matches!(
            Connector::new(&master, &trust),
            Err(TunnelError::Config(_))
        ));
    }

    #[test]
    fn test_unreadable_ca_bundle() {
        let master = MasterAddress::parse("https://master.example.com").unwrap();
        let trust = TrustOptions::new(
            Some("/definitely/not/a/real/ca/12345.pem".parse().unwrap()),
            None,
        );
        assert!(matches!(
            Connector::new(&master, &trust),
            Err(TunnelError::Certificate(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_is_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let master = MasterAddress::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
        let connector = Connector::new(&master, &TrustOptions::default()).unwrap();

        match connector.connect().await {
            Err(TunnelError::Connect { addr, .. }) => {
                assert_eq!(addr, format!("127.0.0.1:{}", port))
            }
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("connection to a closed port succeeded"),
        }
    }

    #[tokio::test]
    async fn test_connect_error_keeps_ipv6_brackets() {
        let master = MasterAddress::parse("http://[::1]:1").unwrap();
        let connector = Connector::new(&master, &TrustOptions::default()).unwrap();

        match connector.connect().await {
            Err(TunnelError::Connect { addr, .. }) => assert_eq!(addr, "[::1]:1"),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("connected to port 1 on ::1"),
        }
    }
}

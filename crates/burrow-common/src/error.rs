use thiserror::Error;

/// Errors that abort a tunnel before any payload is relayed.
///
/// Failures after the tunnel is established are not represented here: they
/// end a single relay direction and are reported by the relay itself.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed master address, invalid service identifier or unusable option
    #[error("Configuration error: {0}")]
    Config(String),

    /// DNS resolution or TCP connect failure
    #[error("Failed to connect to {addr}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The master's certificate was rejected during the TLS handshake
    #[error("TLS verification failed for '{server_name}'")]
    TlsVerification {
        server_name: String,
        source: rustls::Error,
    },

    /// The TLS handshake broke off for a reason other than verification
    #[error("TLS handshake with '{server_name}' failed")]
    TlsHandshake {
        server_name: String,
        source: std::io::Error,
    },

    /// The proxy refused or failed the CONNECT request
    #[error("Tunnel establishment failed: {0}")]
    TunnelEstablish(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

impl TunnelError {
    /// Classify an error returned by a TLS client handshake.
    ///
    /// tokio-rustls reports certificate rejections as `io::Error` wrapping a
    /// `rustls::Error`; those are lifted out so callers can inspect them.
    /// Every other failure stays a [`TunnelError::TlsHandshake`].
    pub fn from_handshake(server_name: impl Into<String>, err: std::io::Error) -> Self {
        let server_name = server_name.into();
        let rustls_err = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .filter(|e| matches!(e, rustls::Error::InvalidCertificate(_)))
            .cloned();

        match rustls_err {
            Some(source) => Self::TlsVerification {
                server_name,
                source,
            },
            None => Self::TlsHandshake {
                server_name,
                source: err,
            },
        }
    }

    /// Whether this error came out of the TLS layer
    pub fn is_tls(&self) -> bool {
        matches!(
            self,
            Self::TlsVerification { .. } | Self::TlsHandshake { .. } | Self::Tls(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_handshake_error_with_rustls_cause() {
        let io_err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );

        match TunnelError::from_handshake("master.example.com", io_err) {
            TunnelError::TlsVerification {
                server_name,
                source,
            } => {
                assert_eq!(server_name, "master.example.com");
                assert_eq!(
                    source,
                    rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer)
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_handshake_error_without_rustls_cause() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err = TunnelError::from_handshake("10.0.0.1", io_err);

        assert!(matches!(err, TunnelError::TlsHandshake { .. }));
        assert!(err.is_tls());
    }

    #[test]
    fn test_protocol_error_is_not_verification() {
        let io_err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidMessage(rustls::InvalidMessage::InvalidContentType),
        );
        let err = TunnelError::from_handshake("10.0.0.1", io_err);

        assert!(matches!(err, TunnelError::TlsHandshake { .. }));
    }

    #[test]
    fn test_non_tls_errors() {
        assert!(!TunnelError::Config("bad".to_string()).is_tls());
        assert!(!TunnelError::TunnelEstablish("403".to_string()).is_tls());
    }
}

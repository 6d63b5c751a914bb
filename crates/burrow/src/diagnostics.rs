//! Human-readable reports for TLS failures against the master

use std::fmt::{self, Write};

use burrow_common::TunnelError;

/// SAN mismatch diagnostic with detailed information
#[derive(Debug, miette::Diagnostic)]
#[diagnostic(code(burrow::tls::name_mismatch), severity(error))]
pub struct NameMismatchDiagnostic {
    expected: String,
    presented: Vec<String>,

    #[help]
    help: String,
}

impl fmt::Display for NameMismatchDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Master certificate hostname mismatch")?;
        writeln!(f)?;
        writeln!(f, "  Expected hostname: {}", self.expected)?;
        writeln!(f, "  Certificate is valid for:")?;
        if self.presented.is_empty() {
            writeln!(f, "    (no SANs found in certificate)")?;
        } else {
            for name in &self.presented {
                writeln!(f, "    - {}", name)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for NameMismatchDiagnostic {}

/// Unknown issuer diagnostic
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
#[error("Master certificate issuer not trusted")]
#[diagnostic(code(burrow::tls::unknown_issuer), severity(error))]
pub struct UnknownIssuerDiagnostic {
    #[help]
    help: String,
}

/// Certificate expired diagnostic
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
#[error("Master certificate has expired")]
#[diagnostic(code(burrow::tls::expired), severity(error))]
pub struct ExpiredCertDiagnostic {
    #[help]
    help: String,
}

/// Generic TLS diagnostic for other errors
#[derive(Debug, miette::Diagnostic, thiserror::Error)]
#[error("{message}")]
#[diagnostic(code(burrow::tls::error), severity(error))]
pub struct GenericTlsDiagnostic {
    message: String,
    #[help]
    help: String,
}

type BoxedDiagnostic = Box<dyn miette::Diagnostic + Send + Sync>;

/// Find a TLS failure in the error chain and describe it
pub fn analyze(error: &anyhow::Error) -> Option<BoxedDiagnostic> {
    let tunnel_err = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<TunnelError>())?;

    match tunnel_err {
        TunnelError::TlsVerification {
            server_name,
            source,
        } => Some(analyze_rustls_error(server_name, source)),
        TunnelError::TlsHandshake {
            server_name,
            source,
        } => match source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            Some(rustls_err) => Some(analyze_rustls_error(server_name, rustls_err)),
            None => Some(Box::new(GenericTlsDiagnostic {
                message: format!("TLS handshake with {} failed: {}", server_name, source),
                help: "Check that the master address uses the right port and that the master actually serves TLS there.".to_string(),
            })),
        },
        TunnelError::Tls(msg) => Some(Box::new(GenericTlsDiagnostic {
            message: format!("TLS setup failed: {}", msg),
            help: "Check your TLS configuration.".to_string(),
        })),
        _ => None,
    }
}

fn analyze_rustls_error(server_name: &str, err: &rustls::Error) -> BoxedDiagnostic {
    use rustls::Error;

    match err {
        Error::InvalidCertificate(cert_err) => analyze_certificate_error(server_name, cert_err),
        Error::AlertReceived(alert) => Box::new(GenericTlsDiagnostic {
            message: format!("Master rejected the connection with TLS alert: {:?}", alert),
            help: "The master refused the handshake. Check that it accepts TLS on this port."
                .to_string(),
        }),
        Error::PeerIncompatible(reason) => Box::new(GenericTlsDiagnostic {
            message: format!("Master is incompatible: {:?}", reason),
            help: "The master doesn't support the required TLS version or features.".to_string(),
        }),
        Error::PeerMisbehaved(reason) => Box::new(GenericTlsDiagnostic {
            message: format!("Master protocol violation: {:?}", reason),
            help: "The master sent invalid TLS data. This may indicate a misconfigured load balancer or a MITM attack.".to_string(),
        }),
        Error::InvalidMessage(reason) => Box::new(GenericTlsDiagnostic {
            message: format!("Invalid TLS message: {:?}", reason),
            help: "The master may not be speaking TLS on this port; try an http:// address."
                .to_string(),
        }),
        Error::FailedToGetCurrentTime => Box::new(GenericTlsDiagnostic {
            message: "Failed to get system time".to_string(),
            help: "Certificate validation requires accurate system time. Check your system clock.".to_string(),
        }),
        _ => Box::new(GenericTlsDiagnostic {
            message: format!("TLS error: {}", err),
            help: "Check your TLS configuration and certificates.".to_string(),
        }),
    }
}

fn analyze_certificate_error(
    server_name: &str,
    err: &rustls::CertificateError,
) -> BoxedDiagnostic {
    use rustls::pki_types::ServerName;
    use rustls::CertificateError;

    match err {
        CertificateError::NotValidForNameContext { expected, presented } => {
            let expected = match expected {
                ServerName::DnsName(name) => name.as_ref().to_string(),
                ServerName::IpAddress(ip) => format!("{:?}", ip),
                _ => format!("{:?}", expected),
            };

            Box::new(NameMismatchDiagnostic {
                expected,
                presented: presented.clone(),
                help: "If the master is reached through an address its certificate doesn't name, pass the certificate's name with --cert-name.".to_string(),
            })
        }
        CertificateError::NotValidForName => Box::new(NameMismatchDiagnostic {
            expected: server_name.to_string(),
            presented: Vec::new(),
            help: "Pass the name the certificate was issued for with --cert-name.".to_string(),
        }),
        CertificateError::UnknownIssuer => Box::new(UnknownIssuerDiagnostic {
            help: "The master's certificate was not signed by a trusted CA. Pass the master's CA bundle with --cert-file.".to_string(),
        }),
        CertificateError::ExpiredContext { time, not_after } => Box::new(ExpiredCertDiagnostic {
            help: format!(
                "Certificate expired at {:?} (current time: {:?}). Renew the master's certificate.",
                not_after, time
            ),
        }),
        CertificateError::Expired => Box::new(ExpiredCertDiagnostic {
            help: "Renew the master's certificate.".to_string(),
        }),
        CertificateError::NotValidYet | CertificateError::NotValidYetContext { .. } => {
            Box::new(GenericTlsDiagnostic {
                message: "Master certificate is not yet valid".to_string(),
                help: "The certificate's notBefore date is in the future. Check your system clock."
                    .to_string(),
            })
        }
        CertificateError::BadSignature => Box::new(GenericTlsDiagnostic {
            message: "Master certificate signature is invalid".to_string(),
            help: "The certificate may be corrupted or was not signed by the expected CA."
                .to_string(),
        }),
        CertificateError::BadEncoding => Box::new(GenericTlsDiagnostic {
            message: "Master certificate encoding is invalid".to_string(),
            help: "The master presented a malformed certificate.".to_string(),
        }),
        CertificateError::InvalidPurpose => Box::new(GenericTlsDiagnostic {
            message: "Master certificate purpose is invalid".to_string(),
            help: "The certificate's Extended Key Usage doesn't allow TLS server authentication."
                .to_string(),
        }),
        _ => Box::new(GenericTlsDiagnostic {
            message: format!("Certificate validation failed: {:?}", err),
            help: "Check the master's certificate configuration.".to_string(),
        }),
    }
}

/// Render a diagnostic for stderr
pub fn render(diagnostic: &dyn miette::Diagnostic) -> String {
    let mut output = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(output);
    let _ = writeln!(output, "  × TLS connection to master failed");
    let _ = writeln!(output);

    if let Some(code) = diagnostic.code() {
        let _ = writeln!(output, "  Error: {}", code);
    }

    let _ = writeln!(output, "  {}", diagnostic);

    if let Some(help) = diagnostic.help() {
        let _ = writeln!(output);
        let _ = writeln!(output, "  help: {}", help);
    }

    output
}

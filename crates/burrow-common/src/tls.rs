use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use std::io::Cursor;
use std::sync::Arc;

use crate::TunnelError;

/// Load certificates from PEM content string
pub fn load_certs_from_pem(pem_content: &str) -> Result<Vec<CertificateDer<'static>>, TunnelError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    let parsed = certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TunnelError::Certificate(format!("Failed to parse certificates: {}", e)))?;

    if parsed.is_empty() {
        return Err(TunnelError::Certificate(
            "No certificates found in PEM content".to_string(),
        ));
    }
    Ok(parsed)
}

/// Load a private key from PEM content string
pub fn load_private_key_from_pem(pem_content: &str) -> Result<PrivateKeyDer<'static>, TunnelError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    private_key(&mut cursor)
        .map_err(|e| TunnelError::Certificate(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| TunnelError::Certificate("No private key found in PEM content".to_string()))
}

/// Build a root store holding only the certificates of a CA bundle
fn load_root_store_from_pem(pem_content: &str) -> Result<RootCertStore, TunnelError> {
    let ca_certs = load_certs_from_pem(pem_content)?;
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store.add(cert).map_err(|e| {
            TunnelError::Certificate(format!("Failed to add CA certificate: {}", e))
        })?;
    }
    Ok(root_store)
}

/// Root store used when no CA bundle is configured.
///
/// Prefers the operating system's trust store and falls back to the bundled
/// Mozilla roots when the platform store yields nothing usable.
pub fn platform_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if !native.errors.is_empty() {
        tracing::debug!(
            "Platform trust store reported {} errors; continuing with {} roots",
            native.errors.len(),
            added
        );
    }
    if ignored > 0 {
        tracing::debug!("Ignored {} unparsable platform root certificates", ignored);
    }

    if roots.is_empty() {
        tracing::debug!("Platform trust store is empty, using bundled webpki roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Load client TLS config for talking to the master
///
/// # Arguments
/// * `ca_pem` - CA bundle PEM content; when `None` the platform roots are trusted
pub fn load_client_config(ca_pem: Option<&str>) -> Result<ClientConfig, TunnelError> {
    let root_store = match ca_pem {
        Some(pem) => load_root_store_from_pem(pem)?,
        None => platform_root_store(),
    };

    let mut config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::Tls(format!("Failed to build client config: {}", e)))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    // CONNECT is an HTTP/1.1 method; never let the master negotiate h2.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

/// Load server TLS config from PEM content strings, without client auth
///
/// # Arguments
/// * `cert_pem` - Server certificate chain PEM content
/// * `key_pem` - Server private key PEM content
pub fn load_server_config_from_pem(
    cert_pem: &str,
    key_pem: &str,
) -> Result<ServerConfig, TunnelError> {
    let certs = load_certs_from_pem(cert_pem)?;
    let key = load_private_key_from_pem(key_pem)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::Tls(format!("Failed to build server config: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TunnelError::Tls(format!("Failed to build server config: {}", e)))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

//! Sources of CA trust material
//!
//! The CA bundle used to verify the master can be given as:
//!
//! - a file path (`/etc/burrow/ca.pem`, `~/ca.pem`, `file:///etc/burrow/ca.pem`)
//! - an environment variable holding PEM (`env://BURROW_CA`)
//! - base64-encoded PEM (`base64://LS0tLS1CRUdJTi...`)
//! - inline PEM content

use std::path::PathBuf;
use std::str::FromStr;

use base64::Engine;

use crate::TunnelError;

/// Where a CA bundle comes from. Resolved once, before connecting.
#[derive(Debug, Clone, PartialEq)]
pub enum TrustSource {
    /// PEM file on disk
    File { path: PathBuf },

    /// Environment variable holding PEM content: `env://VAR_NAME`
    Env { var_name: String },

    /// Base64-encoded PEM: `base64://...`
    Base64 { data: String },

    /// PEM content given directly
    Pem(String),
}

impl TrustSource {
    /// Read the PEM content this source points at
    pub fn resolve(&self) -> Result<String, TunnelError> {
        tracing::debug!(source = self.kind(), "Resolving CA bundle");

        let pem = match self {
            TrustSource::File { path } => std::fs::read_to_string(path).map_err(|e| {
                TunnelError::Certificate(format!("Failed to read CA bundle {:?}: {}", path, e))
            })?,
            TrustSource::Env { var_name } => std::env::var(var_name).map_err(|_| {
                TunnelError::Certificate(format!(
                    "Environment variable '{}' not set",
                    var_name
                ))
            })?,
            TrustSource::Base64 { data } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.trim())
                    .map_err(|e| {
                        TunnelError::Certificate(format!("Invalid base64 CA bundle: {}", e))
                    })?;
                String::from_utf8(bytes).map_err(|e| {
                    TunnelError::Certificate(format!("CA bundle is not UTF-8: {}", e))
                })?
            }
            TrustSource::Pem(pem) => pem.clone(),
        };

        Ok(pem.trim().to_string())
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            TrustSource::File { .. } => "file",
            TrustSource::Env { .. } => "env",
            TrustSource::Base64 { .. } => "base64",
            TrustSource::Pem(_) => "pem",
        }
    }
}

impl FromStr for TrustSource {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TunnelError::Config("CA bundle source is empty".to_string()));
        }

        if let Some(var_name) = s.strip_prefix("env://") {
            if var_name.is_empty() {
                return Err(TunnelError::Config(
                    "env:// CA source must name a variable".to_string(),
                ));
            }
            Ok(TrustSource::Env {
                var_name: var_name.to_string(),
            })
        } else if let Some(data) = s.strip_prefix("base64://") {
            if data.is_empty() {
                return Err(TunnelError::Config(
                    "base64:// CA source has no data".to_string(),
                ));
            }
            Ok(TrustSource::Base64 {
                data: data.to_string(),
            })
        } else if s.contains("-----BEGIN") {
            Ok(TrustSource::Pem(s.to_string()))
        } else {
            let path = s.strip_prefix("file://").unwrap_or(s);
            if path.is_empty() {
                return Err(TunnelError::Config(
                    "file:// CA source must specify a path".to_string(),
                ));
            }
            Ok(TrustSource::File {
                path: PathBuf::from(shellexpand::tilde(path).into_owned()),
            })
        }
    }
}

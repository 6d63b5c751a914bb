//! Burrow configuration management
//!
//! Handles loading and saving `~/.config/burrow/config.toml`. Only
//! connection defaults live there; the service to reach is always given on
//! the command line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use burrow_common::TrustSource;
use serde::{Deserialize, Serialize};

/// Environment variable consulted for the master address
pub const MASTER_ENV: &str = "BURROW_MASTER";

/// Connection defaults read from the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurrowConfig {
    /// Master address (`https://host:port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    /// CA bundle for the master (path, env://, base64:// or inline PEM)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,

    /// Name to verify the master's certificate against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_name: Option<String>,
}

impl BurrowConfig {
    /// Get the default config directory path
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("burrow")
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        Ok(config)
    }

    /// Load the config file if there is one; an unreadable file is an error
    pub fn try_load_default() -> anyhow::Result<Option<Self>> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Check that every value present would be accepted at connect time
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Some(master) = &self.master {
            if let Err(e) = crate::MasterAddress::parse(master) {
                errors.push(e.to_string());
            }
        }

        if let Some(cert_file) = &self.cert_file {
            if let Err(e) = cert_file.parse::<TrustSource>() {
                errors.push(format!("cert_file: {}", e));
            }
        }

        if matches!(&self.cert_name, Some(name) if name.trim().is_empty()) {
            errors.push("cert_name must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Layer command-line values over this file's values.
    ///
    /// The master comes from, in order: `cli_master`, `env_master`, the file.
    pub fn resolve(
        &self,
        cli_master: Option<String>,
        env_master: Option<String>,
        cli_cert_file: Option<String>,
        cli_cert_name: Option<String>,
    ) -> Self {
        Self {
            master: cli_master
                .or(env_master)
                .or_else(|| self.master.clone()),
            cert_file: cli_cert_file.or_else(|| self.cert_file.clone()),
            cert_name: cli_cert_name.or_else(|| self.cert_name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BurrowConfig::default();
        assert!(config.master.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = BurrowConfig {
            master: Some("https://".to_string()),
            cert_file: Some("env://".to_string()),
            cert_name: Some("  ".to_string()),
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("master address"));
        assert!(errors[1].starts_with("cert_file"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = BurrowConfig {
            master: Some("https://master.example.com:8443".to_string()),
            cert_file: Some("/etc/burrow/ca.pem".to_string()),
            cert_name: None,
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config.save(&path).unwrap();

        let loaded = BurrowConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "cert_name = \"master.internal\"\n").unwrap();

        let loaded = BurrowConfig::load(file.path()).unwrap();
        assert_eq!(loaded.cert_name.as_deref(), Some("master.internal"));
        assert!(loaded.master.is_none());
    }

    #[test]
    fn test_invalid_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "master = [").unwrap();
        assert!(BurrowConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_resolve_precedence() {
        let file = BurrowConfig {
            master: Some("https://from-file".to_string()),
            cert_file: Some("/from/file.pem".to_string()),
            cert_name: Some("file-name".to_string()),
        };

        let resolved = file.resolve(None, Some("https://from-env".to_string()), None, None);
        assert_eq!(resolved.master.as_deref(), Some("https://from-env"));
        assert_eq!(resolved.cert_file.as_deref(), Some("/from/file.pem"));

        let resolved = file.resolve(
            Some("https://from-cli".to_string()),
            Some("https://from-env".to_string()),
            Some("/from/cli.pem".to_string()),
            Some("cli-name".to_string()),
        );
        assert_eq!(resolved.master.as_deref(), Some("https://from-cli"));
        assert_eq!(resolved.cert_file.as_deref(), Some("/from/cli.pem"));
        assert_eq!(resolved.cert_name.as_deref(), Some("cli-name"));

        let resolved = file.resolve(None, None, None, None);
        assert_eq!(resolved, file);
    }
}

use std::fmt;
use std::str::FromStr;

use burrow_common::TunnelError;

/// Port assumed for a master address given without scheme or port.
pub const DEFAULT_MASTER_PORT: u16 = 8080;

/// Transport used to reach the master's proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http://`
    Plain,
    /// `https://`: TLS to the master itself, before CONNECT
    Secure,
}

impl Scheme {
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Plain => 80,
            Scheme::Secure => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Plain => "http",
            Scheme::Secure => "https",
        }
    }
}

/// A parsed master endpoint. `host` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddress {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl MasterAddress {
    /// Parse `scheme://host[:port]`.
    ///
    /// `https` defaults to port 443 and `http` to port 80. An address without
    /// a scheme is treated as `http` on [`DEFAULT_MASTER_PORT`]. Any path,
    /// query or user-info part is ignored.
    pub fn parse(input: &str) -> Result<Self, TunnelError> {
        let trimmed = input.trim();

        let (scheme, rest, default_port) = match trimmed.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => {
                (Scheme::Secure, rest, Scheme::Secure.default_port())
            }
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => {
                (Scheme::Plain, rest, Scheme::Plain.default_port())
            }
            Some((scheme, _)) => {
                return Err(TunnelError::Config(format!(
                    "Unsupported scheme '{}' in master address: {}",
                    scheme, input
                )))
            }
            None => (Scheme::Plain, trimmed, DEFAULT_MASTER_PORT),
        };

        let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
        let authority = match authority.rsplit_once('@') {
            Some((_, host_port)) => host_port,
            None => authority,
        };

        let (host, port) = split_host_port(authority)
            .map_err(|reason| parse_error(input, reason))?;

        if host.is_empty() {
            return Err(parse_error(input, "no hostname"));
        }

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port: port.unwrap_or(default_port),
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Hostname or IP literal, without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Secure
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for MasterAddress {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MasterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.authority())
    }
}

fn parse_error(input: &str, reason: &str) -> TunnelError {
    TunnelError::Config(format!(
        "Failed to parse master address '{}': {}",
        input, reason
    ))
}

fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), &'static str> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or("unterminated IPv6 literal")?;
        let port = match after {
            "" => None,
            _ => parse_port(after.strip_prefix(':').ok_or("garbage after IPv6 literal")?)?,
        };
        return Ok((host, port));
    }

    match authority.rsplit_once(':') {
        Some((host, _)) if host.contains(':') => Err("IPv6 literals must be bracketed"),
        Some((host, port)) => Ok((host, parse_port(port)?)),
        None => Ok((authority, None)),
    }
}

fn parse_port(port: &str) -> Result<Option<u16>, &'static str> {
    if port.is_empty() {
        return Ok(None);
    }
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err("invalid port"),
        Ok(p) => Ok(Some(p)),
    }
}

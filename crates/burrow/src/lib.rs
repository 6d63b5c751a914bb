//! Relay a byte stream through an HTTP CONNECT tunnel on a master endpoint.
//!
//! The master may be plain `http://` or `https://`. For `https://` masters
//! the TLS session is set up with the master itself before the CONNECT
//! request is sent, so the whole exchange is encrypted regardless of what
//! the tunnel target speaks.
//!
//! ```rust,ignore
//! use burrow::{open_tunnel, relay_stdio, MasterAddress, TrustOptions};
//!
//! let master: MasterAddress = "https://master.example.com:8443".parse()?;
//! let tunnel = open_tunnel(&master, "shell-1234:22", &TrustOptions::default()).await?;
//! let report = relay_stdio(tunnel).await;
//! ```

pub mod address;
pub mod config;
pub mod connector;
pub mod diagnostics;
pub mod handshake;
pub mod relay;

pub use address::{MasterAddress, Scheme};
pub use burrow_common::{TrustSource, TunnelError};
pub use config::BurrowConfig;
pub use connector::{Connector, MasterStream, TrustOptions};
pub use handshake::{establish, open_tunnel, TunnelChannel};
pub use relay::{close_quietly, relay, relay_stdio, CopyEnd, CopyOutcome, Direction, RelayReport};

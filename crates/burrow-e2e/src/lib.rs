//! End-to-end test utilities for the burrow tunnel client
//!
//! Provides generated certificates and a mock master that answers CONNECT
//! requests, so tunnels can be exercised over real sockets without a real
//! master.

pub mod certificates;
pub mod mock_proxy;

pub use certificates::TestCertificates;
pub use mock_proxy::{MockProxy, ProxyMode, ProxyStats};

mod error;
mod tls;
mod trust;

pub use error::TunnelError;
pub use tls::{
    load_certs_from_pem, load_client_config, load_private_key_from_pem, load_server_config_from_pem,
    platform_root_store,
};
pub use trust::TrustSource;

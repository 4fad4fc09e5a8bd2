pub mod reality;
pub mod tls;

pub use reality::{RealityConfig, RealityServer};
pub use tls::TlsServer;

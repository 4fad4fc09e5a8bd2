pub mod crypto;
pub mod error;

pub use crypto::{generate_reality_keypair, RealityKeyPair};
pub use error::ProxyError;

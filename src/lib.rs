pub mod config;
pub mod handler;
pub mod logging;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use registry::{ClientRecord, ClientRegistry};
pub use server::{Server, ServerStats};

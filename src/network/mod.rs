pub mod connection;
pub mod socket;

pub use connection::{relay, ConnectionGuard, ConnectionManager, RelayStats};
pub use socket::bind_listener;

pub mod vless;

pub use vless::{Address, Command, DecodeError, VlessRequest, VlessResponse};

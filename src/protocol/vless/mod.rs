mod address;
mod error;
mod request;
mod response;

pub use address::Address;
pub use error::{DecodeError, HeaderField};
pub use request::{Command, VlessRequest, VLESS_VERSION};
pub use response::VlessResponse;

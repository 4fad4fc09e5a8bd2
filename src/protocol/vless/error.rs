use std::fmt;
use std::io;

use thiserror::Error;

/// 正在读取的头部字段，用于截断错误定位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    Version,
    ClientId,
    AddonLength,
    Addons,
    Command,
    Port,
    AddressType,
    Ipv4,
    DomainLength,
    Domain,
    Ipv6,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeaderField::Version => "version",
            HeaderField::ClientId => "client id",
            HeaderField::AddonLength => "addon length",
            HeaderField::Addons => "addons",
            HeaderField::Command => "command",
            HeaderField::Port => "port",
            HeaderField::AddressType => "address type",
            HeaderField::Ipv4 => "ipv4 address",
            HeaderField::DomainLength => "domain length",
            HeaderField::Domain => "domain",
            HeaderField::Ipv6 => "ipv6 address",
        };
        f.write_str(name)
    }
}

/// VLESS 头部解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported VLESS version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(u8),

    #[error("truncated header while reading {0}")]
    TruncatedHeader(HeaderField),

    #[error("i/o error while reading {field}: {source}")]
    Io {
        field: HeaderField,
        #[source]
        source: io::Error,
    },
}

impl DecodeError {
    pub(crate) fn from_io(field: HeaderField, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::TruncatedHeader(field)
        } else {
            DecodeError::Io { field, source: err }
        }
    }
}

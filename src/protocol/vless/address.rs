use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::{DecodeError, HeaderField};

pub const ADDR_TYPE_IPV4: u8 = 0x01;
pub const ADDR_TYPE_DOMAIN: u8 = 0x02;
pub const ADDR_TYPE_IPV6: u8 = 0x03;

/// VLESS 地址类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 地址
    Ipv4(Ipv4Addr, u16),
    /// IPv6 地址
    Ipv6(Ipv6Addr, u16),
    /// 域名
    Domain(String, u16),
}

impl Address {
    /// 从流中读取地址类型和地址。端口在地址类型之前，由调用方先读出。
    ///
    /// 未知类型只消耗类型字节本身。
    pub async fn decode<R>(reader: &mut R, port: u16) -> Result<Self, DecodeError>
    where
        R: AsyncRead + Unpin,
    {
        let addr_type = reader
            .read_u8()
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::AddressType, e))?;

        match addr_type {
            ADDR_TYPE_IPV4 => {
                let mut octets = [0u8; 4];
                reader
                    .read_exact(&mut octets)
                    .await
                    .map_err(|e| DecodeError::from_io(HeaderField::Ipv4, e))?;
                Ok(Address::Ipv4(Ipv4Addr::from(octets), port))
            }
            ADDR_TYPE_DOMAIN => {
                let len = reader
                    .read_u8()
                    .await
                    .map_err(|e| DecodeError::from_io(HeaderField::DomainLength, e))?
                    as usize;
                let mut domain = vec![0u8; len];
                reader
                    .read_exact(&mut domain)
                    .await
                    .map_err(|e| DecodeError::from_io(HeaderField::Domain, e))?;
                Ok(Address::Domain(
                    String::from_utf8_lossy(&domain).into_owned(),
                    port,
                ))
            }
            ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                reader
                    .read_exact(&mut octets)
                    .await
                    .map_err(|e| DecodeError::from_io(HeaderField::Ipv6, e))?;
                Ok(Address::Ipv6(Ipv6Addr::from(octets), port))
            }
            other => Err(DecodeError::UnsupportedAddressType(other)),
        }
    }

    /// 按线格式写出地址类型和地址 (不含端口)
    ///
    /// 超过 255 字节的域名会被截断。
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Address::Ipv4(ip, _) => {
                buf.put_u8(ADDR_TYPE_IPV4);
                buf.put_slice(&ip.octets());
            }
            Address::Domain(domain, _) => {
                let bytes = &domain.as_bytes()[..domain.len().min(u8::MAX as usize)];
                buf.put_u8(ADDR_TYPE_DOMAIN);
                buf.put_u8(bytes.len() as u8);
                buf.put_slice(bytes);
            }
            Address::Ipv6(ip, _) => {
                buf.put_u8(ADDR_TYPE_IPV6);
                buf.put_slice(&ip.octets());
            }
        }
    }

    /// 获取端口
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) | Address::Ipv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    /// 主机部分，IPv6 不带方括号
    pub fn host(&self) -> String {
        match self {
            Address::Ipv4(ip, _) => ip.to_string(),
            Address::Ipv6(ip, _) => ip.to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }
}

/// `host:port`，IPv6 使用 `[host]:port`
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

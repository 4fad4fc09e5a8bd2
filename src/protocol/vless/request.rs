use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use super::error::{DecodeError, HeaderField};
use super::Address;

/// VLESS 协议版本
pub const VLESS_VERSION: u8 = 0;

/// VLESS 命令类型
///
/// 解码层接受任意命令字节，是否服务由上层决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// TCP 连接
    Tcp,
    /// UDP 连接
    Udp,
    /// Mux (多路复用)
    Mux,
    /// 未定义的命令字节
    Other(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Command::Tcp,
            0x02 => Command::Udp,
            0x03 => Command::Mux,
            other => Command::Other(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Tcp => 0x01,
            Command::Udp => 0x02,
            Command::Mux => 0x03,
            Command::Other(value) => value,
        }
    }
}

/// VLESS 请求头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlessRequest {
    /// 协议版本
    pub version: u8,
    /// 客户端 UUID (原始 16 字节，不做格式校验)
    pub uuid: Uuid,
    /// 附加数据长度 (内容已丢弃)
    pub addon_length: u8,
    /// 命令类型
    pub command: Command,
    /// 目标地址
    pub address: Address,
}

impl VlessRequest {
    /// 从流中逐字段解码请求头，只读取头部本身的字节
    pub async fn decode<R>(reader: &mut R) -> Result<Self, DecodeError>
    where
        R: AsyncRead + Unpin,
    {
        let version = reader
            .read_u8()
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::Version, e))?;
        if version != VLESS_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let mut uuid_bytes = [0u8; 16];
        reader
            .read_exact(&mut uuid_bytes)
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::ClientId, e))?;

        let addon_length = reader
            .read_u8()
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::AddonLength, e))?;
        if addon_length > 0 {
            let mut addons = vec![0u8; addon_length as usize];
            reader
                .read_exact(&mut addons)
                .await
                .map_err(|e| DecodeError::from_io(HeaderField::Addons, e))?;
        }

        let command = reader
            .read_u8()
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::Command, e))?;

        let port = reader
            .read_u16()
            .await
            .map_err(|e| DecodeError::from_io(HeaderField::Port, e))?;

        let address = Address::decode(reader, port).await?;

        Ok(VlessRequest {
            version,
            uuid: Uuid::from_bytes(uuid_bytes),
            addon_length,
            command: Command::from(command),
            address,
        })
    }

    /// 将请求编码为字节流 (客户端方向，附加数据为空)
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(22 + 256);

        buf.put_u8(self.version);
        buf.put_slice(self.uuid.as_bytes());
        buf.put_u8(0);
        buf.put_u8(self.command.into());
        buf.put_u16(self.address.port());
        self.address.encode(&mut buf);

        buf
    }

    /// 规范 UUID 字符串 (小写，带连字符)，用于查找和审计日志
    pub fn client_id(&self) -> String {
        self.uuid.hyphenated().to_string()
    }

    /// 目标 `host:port`
    pub fn destination(&self) -> String {
        self.address.to_string()
    }
}

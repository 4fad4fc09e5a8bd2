use super::request::VLESS_VERSION;

/// VLESS 响应 (确认)
///
/// 固定两字节：版本 + 附加数据长度 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlessResponse {
    /// 协议版本
    pub version: u8,
}

impl VlessResponse {
    /// 创建新的响应
    pub fn new() -> Self {
        Self {
            version: VLESS_VERSION,
        }
    }

    /// 将响应编码为字节
    pub fn encode(&self) -> [u8; 2] {
        [self.version, 0x00]
    }
}

impl Default for VlessResponse {
    fn default() -> Self {
        Self::new()
    }
}

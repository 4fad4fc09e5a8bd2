mod auth;
pub mod hello_parser;
mod server;
pub mod stream;

pub use auth::{ClientVersion, RealityAuth, RejectReason, SessionInfo, ShortId};
pub use server::{looks_like_tls_handshake, Accepted, CamouflageError, RealityServer};
pub use stream::PrefixedStream;

use serde::{Deserialize, Serialize};

/// Reality 配置 (伪装身份)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealityConfig {
    /// 目标网站地址 (例如: www.apple.com:443)
    pub dest: String,
    /// 服务器名称列表，第一个为默认身份
    pub server_names: Vec<String>,
    /// X25519 私钥 (base64url / base64 / hex)
    pub private_key: String,
    /// Short IDs (hex)
    #[serde(default)]
    pub short_ids: Vec<String>,
    /// 允许的最低客户端版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_client_ver: Option<String>,
    /// 允许的最高客户端版本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_ver: Option<String>,
    /// 允许的最大时间差 (毫秒)，0 表示不检查
    #[serde(default)]
    pub max_time_diff: u64,
    /// 以 info 级别输出拒绝原因
    #[serde(default)]
    pub show: bool,
}

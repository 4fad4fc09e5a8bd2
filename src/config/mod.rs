use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

mod validator;
pub use validator::Validator;

pub use crate::transport::reality::RealityConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 最大并发连接数，缺省时不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
    pub inbounds: Vec<Inbound>,
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_decryption() -> String {
    "none".to_string()
}

/// 入站配置，`protocol` 与 `settings` 在加载时合并为 `InboundSettings`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawInbound", into = "RawInbound")]
pub struct Inbound {
    pub port: u16,
    pub settings: InboundSettings,
    pub stream_settings: Option<StreamSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
}

/// 按协议区分的入站设置
#[derive(Debug, Clone)]
pub enum InboundSettings {
    Vless(VlessSettings),
    Vmess(Value),
    Trojan(Value),
    Shadowsocks(Value),
}

impl InboundSettings {
    pub fn protocol(&self) -> Protocol {
        match self {
            InboundSettings::Vless(_) => Protocol::Vless,
            InboundSettings::Vmess(_) => Protocol::Vmess,
            InboundSettings::Trojan(_) => Protocol::Trojan,
            InboundSettings::Shadowsocks(_) => Protocol::Shadowsocks,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    protocol: Protocol,
    #[serde(default)]
    port: u16,
    #[serde(default)]
    settings: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream_settings: Option<StreamSettings>,
}

impl TryFrom<RawInbound> for Inbound {
    type Error = serde_json::Error;

    fn try_from(raw: RawInbound) -> std::result::Result<Self, Self::Error> {
        let settings = match raw.protocol {
            Protocol::Vless => InboundSettings::Vless(serde_json::from_value(raw.settings)?),
            Protocol::Vmess => InboundSettings::Vmess(raw.settings),
            Protocol::Trojan => InboundSettings::Trojan(raw.settings),
            Protocol::Shadowsocks => InboundSettings::Shadowsocks(raw.settings),
        };
        Ok(Inbound {
            port: raw.port,
            settings,
            stream_settings: raw.stream_settings,
        })
    }
}

impl From<Inbound> for RawInbound {
    fn from(inbound: Inbound) -> Self {
        let protocol = inbound.settings.protocol();
        let settings = match inbound.settings {
            InboundSettings::Vless(vless) => serde_json::to_value(vless).unwrap_or_default(),
            InboundSettings::Vmess(v)
            | InboundSettings::Trojan(v)
            | InboundSettings::Shadowsocks(v) => v,
        };
        RawInbound {
            protocol,
            port: inbound.port,
            settings,
            stream_settings: inbound.stream_settings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlessSettings {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default = "default_decryption")]
    pub decryption: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: String, // UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub security: Security,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_settings: Option<TlsSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality_settings: Option<RealityConfig>,
    #[serde(default)]
    pub sockopt: SockOpt,
}

/// Socket 选项配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SockOpt {
    /// TCP No Delay (禁用 Nagle 算法) - 减少小包延迟
    #[serde(default = "default_true")]
    pub tcp_no_delay: bool,
    /// TCP Fast Open - 减少握手延迟 (仅 Linux)
    #[serde(default)]
    pub tcp_fast_open: bool,
}

impl Default for SockOpt {
    fn default() -> Self {
        Self {
            tcp_no_delay: true,
            tcp_fast_open: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Tcp,
    Http,
    Ws,
    Grpc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
}

/// 普通 TLS 模式设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub certificates: Vec<CertificatePair>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePair {
    pub certificate_file: String,
    pub key_file: String,
}

impl Config {
    /// 从文件加载配置，`.toml` 扩展名按 TOML 解析，其余按 JSON
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("无法读取配置文件 {}", path.display()))?;

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);
        let config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };

        // 验证配置
        Validator::validate(&config)?;

        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("JSON 配置解析失败")
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("TOML 配置解析失败")
    }

    /// 保存配置到文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 第一个启用了 TLS 或 Reality 的入站的传输设置
    pub fn camouflage(&self) -> Option<&StreamSettings> {
        self.inbounds
            .iter()
            .filter_map(|inbound| inbound.stream_settings.as_ref())
            .find(|stream| stream.security != Security::None)
    }

    /// 监听 socket 选项，取自第一个带传输设置的入站
    pub fn sockopt(&self) -> SockOpt {
        self.inbounds
            .iter()
            .find_map(|inbound| inbound.stream_settings.as_ref())
            .map(|stream| stream.sockopt.clone())
            .unwrap_or_default()
    }

    pub fn vless_settings(&self) -> impl Iterator<Item = &VlessSettings> {
        self.inbounds.iter().filter_map(|inbound| match &inbound.settings {
            InboundSettings::Vless(vless) => Some(vless),
            _ => None,
        })
    }
}

use anyhow::{anyhow, Result};
use uuid::Uuid;

use super::{Config, Inbound, InboundSettings, Network, Security, StreamSettings, TlsSettings};
use crate::transport::reality::{ClientVersion, RealityConfig, ShortId};
use crate::utils::crypto::decode_private_key;

pub struct Validator;

impl Validator {
    /// 验证配置的有效性
    pub fn validate(config: &Config) -> Result<()> {
        if config.port == 0 {
            return Err(anyhow!("监听端口不能为 0"));
        }

        // 验证入站配置
        if config.inbounds.is_empty() {
            return Err(anyhow!("至少需要一个入站配置"));
        }

        for (idx, inbound) in config.inbounds.iter().enumerate() {
            Self::validate_inbound(inbound, idx)?;
        }

        if config.max_connections == Some(0) {
            return Err(anyhow!("maxConnections 不能为 0"));
        }

        Ok(())
    }

    fn validate_inbound(inbound: &Inbound, idx: usize) -> Result<()> {
        // 验证端口
        if inbound.port == 0 {
            return Err(anyhow!("入站 {} 的端口不能为 0", idx));
        }

        // 验证客户端 UUID
        if let InboundSettings::Vless(vless) = &inbound.settings {
            for (client_idx, client) in vless.clients.iter().enumerate() {
                if Uuid::parse_str(&client.id).is_err() {
                    return Err(anyhow!(
                        "入站 {} 的客户端 {} UUID 格式无效: {}",
                        idx,
                        client_idx,
                        client.id
                    ));
                }
            }
        }

        if let Some(stream) = &inbound.stream_settings {
            Self::validate_stream_settings(stream, idx)?;
        }

        Ok(())
    }

    fn validate_stream_settings(stream: &StreamSettings, idx: usize) -> Result<()> {
        if stream.network != Network::Tcp {
            return Err(anyhow!("入站 {} 仅支持 tcp 传输", idx));
        }

        match stream.security {
            Security::None => Ok(()),
            Security::Reality => {
                let reality = stream
                    .reality_settings
                    .as_ref()
                    .ok_or_else(|| anyhow!("入站 {} 启用了 reality 但缺少 realitySettings", idx))?;
                Self::validate_reality_settings(reality, idx)
            }
            Security::Tls => {
                let tls = stream
                    .tls_settings
                    .as_ref()
                    .ok_or_else(|| anyhow!("入站 {} 启用了 tls 但缺少 tlsSettings", idx))?;
                Self::validate_tls_settings(tls, idx)
            }
        }
    }

    fn validate_reality_settings(reality: &RealityConfig, inbound_idx: usize) -> Result<()> {
        // 验证目标地址
        if reality.dest.is_empty() {
            return Err(anyhow!("入站 {} 的 Reality dest 不能为空", inbound_idx));
        }
        let valid_dest = reality
            .dest
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid_dest {
            return Err(anyhow!(
                "入站 {} 的 Reality dest 必须是 host:port 形式: {}",
                inbound_idx,
                reality.dest
            ));
        }

        // 验证服务器名称
        if reality.server_names.is_empty() {
            return Err(anyhow!(
                "入站 {} 的 Reality serverNames 不能为空",
                inbound_idx
            ));
        }

        // 验证私钥
        decode_private_key(&reality.private_key)
            .map_err(|e| anyhow!("入站 {} 的 Reality privateKey 无效: {}", inbound_idx, e))?;

        if reality.short_ids.is_empty() {
            return Err(anyhow!("入站 {} 的 Reality shortIds 不能为空", inbound_idx));
        }
        for short_id in &reality.short_ids {
            short_id
                .parse::<ShortId>()
                .map_err(|e| anyhow!("入站 {} 的 Reality shortId 无效: {}", inbound_idx, e))?;
        }

        let parse_version = |v: &Option<String>| -> Result<Option<ClientVersion>> {
            v.as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<ClientVersion>()
                        .map_err(|e| anyhow!("入站 {} 的客户端版本无效: {}", inbound_idx, e))
                })
                .transpose()
        };
        let min = parse_version(&reality.min_client_ver)?;
        let max = parse_version(&reality.max_client_ver)?;
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(anyhow!(
                    "入站 {} 的 minClientVer {} 大于 maxClientVer {}",
                    inbound_idx,
                    min,
                    max
                ));
            }
        }

        Ok(())
    }

    fn validate_tls_settings(tls: &TlsSettings, inbound_idx: usize) -> Result<()> {
        if tls.certificates.is_empty() {
            return Err(anyhow!("入站 {} 的 TLS 至少需要一个证书", inbound_idx));
        }
        Ok(())
    }
}

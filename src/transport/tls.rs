//! TLS 服务端策略与普通 TLS 模式
//!
//! Reality 与普通 TLS 共用同一套策略：TLS 1.2 - 1.3，仅 AEAD 套件，
//! ALPN 为 `h2` / `http/1.1`。

use anyhow::{anyhow, Context, Result};
use rustls::crypto::ring::{cipher_suite, default_provider};
use rustls::crypto::CryptoProvider;
use rustls::{ServerConfig, SupportedCipherSuite};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsSettings;

/// 允许的密码套件
pub fn allowed_cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    ]
}

/// 对外宣告的 ALPN
pub const ALPN_PROTOCOLS: &[&[u8]] = &[b"h2", b"http/1.1"];

/// 按统一策略构建 ServerConfig
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig> {
    let provider = CryptoProvider {
        cipher_suites: allowed_cipher_suites(),
        ..default_provider()
    };

    let mut config = ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| anyhow!("Failed to restrict TLS versions: {}", e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("Failed to create ServerConfig: {}", e))?;

    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
    Ok(config)
}

/// 为单个服务器名生成自签名身份
pub fn self_signed_config(server_name: &str) -> Result<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec![server_name.to_string()])
        .map_err(|e| anyhow!("Failed to generate self-signed cert: {}", e))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| anyhow!("Failed to serialize cert: {}", e))?;
    let key_der = cert.serialize_private_key_der();

    server_config(
        vec![CertificateDer::from(cert_der)],
        PrivateKeyDer::Pkcs8(key_der.into()),
    )
}

/// 普通 TLS 服务器 (使用证书文件)
#[derive(Clone)]
pub struct TlsServer {
    acceptor: TlsAcceptor,
}

impl TlsServer {
    pub fn new(settings: &TlsSettings) -> Result<Self> {
        let pair = settings
            .certificates
            .first()
            .ok_or_else(|| anyhow!("TLS 至少需要一个证书"))?;

        let certs = load_certs(&pair.certificate_file)?;
        let key = load_key(&pair.key_file)?;
        let config = server_config(certs, key)?;

        info!("TLS 服务器初始化成功 (证书: {})", pair.certificate_file);
        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    pub async fn accept<S>(&self, stream: S) -> std::io::Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.acceptor.accept(stream).await
    }
}

fn load_certs(path: impl AsRef<Path>) -> Result<Vec<CertificateDer<'static>>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("无法打开证书文件 {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("证书文件解析失败 {}", path.display()))?;
    if certs.is_empty() {
        return Err(anyhow!("证书文件中没有证书: {}", path.display()));
    }
    Ok(certs)
}

fn load_key(path: impl AsRef<Path>) -> Result<PrivateKeyDer<'static>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("无法打开私钥文件 {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("私钥文件解析失败 {}", path.display()))?
        .ok_or_else(|| anyhow!("私钥文件中没有私钥: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_applied() {
        let config = self_signed_config("www.example.com").unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_allow_list_is_aead_only() {
        for suite in allowed_cipher_suites() {
            let name = format!("{:?}", suite.suite());
            assert!(!name.contains("CBC"), "{}", name);
            assert!(name.contains("GCM") || name.contains("CHACHA20"), "{}", name);
        }
    }

    #[test]
    fn test_pem_files_loaded() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let dir = std::env::temp_dir().join(format!("vless-tls-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        let settings = TlsSettings {
            server_name: Some("localhost".to_string()),
            certificates: vec![crate::config::CertificatePair {
                certificate_file: cert_path.display().to_string(),
                key_file: key_path.display().to_string(),
            }],
        };
        assert!(TlsServer::new(&settings).is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

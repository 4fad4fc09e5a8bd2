use anyhow::{anyhow, Result};
use bytes::BytesMut;
use std::collections::HashMap;
use socket2::SockRef;
use std::io;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, Interest};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use super::auth::{ClientVersion, RealityAuth, RejectReason, ShortId};
use super::hello_parser::{self, ClientHelloInfo, CONTENT_TYPE_HANDSHAKE, RECORD_HEADER_LEN};
use super::stream::PrefixedStream;
use super::RealityConfig;
use crate::transport::tls;
use crate::utils::crypto::decode_private_key;

/// 回落连接目标站点的超时
pub const FALLBACK_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// 单条 TLS 记录的最大长度
const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + 16384;

/// 伪装层错误
#[derive(Debug, Error)]
pub enum CamouflageError {
    #[error("TLS 握手失败: {0}")]
    HandshakeFailed(#[source] io::Error),

    #[error("没有可用的服务器身份: {0}")]
    IdentityUnavailable(String),

    #[error("读取 ClientHello 失败: {0}")]
    Io(#[from] io::Error),
}

/// `wrap` 的结果
pub enum Accepted<S> {
    /// 认证通过，TLS 握手完成
    Tunnel(Box<TlsStream<PrefixedStream<S>>>),
    /// 未通过认证，原始字节已缓冲，应转发到目标站点
    Fallback {
        stream: PrefixedStream<S>,
        reason: RejectReason,
    },
}

/// Reality 服务器
#[derive(Clone)]
pub struct RealityServer {
    inner: Arc<Inner>,
}

struct Inner {
    dest: String,
    server_names: Vec<String>,
    auth: RealityAuth,
    identities: HashMap<String, TlsAcceptor>,
    show: bool,
}

impl RealityServer {
    /// 创建新的 Reality 服务器
    pub fn new(config: RealityConfig) -> Result<Self> {
        // 验证配置
        if config.dest.is_empty() {
            return Err(anyhow!("Reality dest 不能为空"));
        }
        if config.server_names.is_empty() {
            return Err(anyhow!("Reality serverNames 不能为空"));
        }

        let private_key = decode_private_key(&config.private_key)?;
        let short_ids = config
            .short_ids
            .iter()
            .map(|s| s.parse::<ShortId>())
            .collect::<Result<Vec<_>>>()?;
        let min_client_ver = config
            .min_client_ver
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<ClientVersion>)
            .transpose()?;
        let max_client_ver = config
            .max_client_ver
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<ClientVersion>)
            .transpose()?;

        let auth = RealityAuth::new(
            private_key,
            short_ids,
            min_client_ver,
            max_client_ver,
            Duration::from_millis(config.max_time_diff),
        );

        let mut identities = HashMap::new();
        for name in &config.server_names {
            match tls::self_signed_config(name) {
                Ok(server_config) => {
                    identities.insert(name.clone(), TlsAcceptor::from(Arc::new(server_config)));
                }
                Err(e) => warn!("无法为 {} 生成服务器身份: {}", name, e),
            }
        }
        if identities.is_empty() {
            return Err(anyhow!("没有任何 serverName 能生成服务器身份"));
        }

        info!("Reality 服务器初始化成功");
        debug!("目标: {}, serverNames: {:?}", config.dest, config.server_names);

        Ok(Self {
            inner: Arc::new(Inner {
                dest: config.dest,
                server_names: config.server_names,
                auth,
                identities,
                show: config.show,
            }),
        })
    }

    /// 回落目标
    pub fn dest(&self) -> &str {
        &self.inner.dest
    }

    /// 客户端公钥 (与私钥配对)
    pub fn public_key(&self) -> [u8; 32] {
        self.inner.auth.public_key()
    }

    pub fn validate_short_id(&self, short_id: &ShortId) -> bool {
        self.inner.auth.validate_short_id(short_id)
    }

    /// 读取第一条 TLS 记录并认证，通过后在同一字节流上完成 TLS 握手
    ///
    /// 未通过时返回 `Accepted::Fallback`，缓冲的字节原样保留在流中。
    pub async fn wrap<S>(&self, mut stream: S) -> Result<Accepted<S>, CamouflageError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(2048);

        let total = loop {
            if (!buf.is_empty() && buf[0] != CONTENT_TYPE_HANDSHAKE)
                || (buf.len() >= 3 && !hello_parser::is_tls_handshake(&buf))
            {
                return Ok(self.reject(buf, stream, RejectReason::NotTls));
            }
            if let Some(total) = hello_parser::record_len(&buf) {
                if total > MAX_RECORD_LEN {
                    return Ok(self.reject(buf, stream, RejectReason::MalformedHello));
                }
                if buf.len() >= total {
                    break total;
                }
            }

            if stream.read_buf(&mut buf).await? == 0 {
                return Err(CamouflageError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Connection closed during ClientHello",
                )));
            }
        };

        let hello = match hello_parser::parse_client_hello(&buf[..total]) {
            Ok(Some(hello)) => hello,
            Ok(None) | Err(_) => return Ok(self.reject(buf, stream, RejectReason::MalformedHello)),
        };

        let name = match self.check(&hello) {
            Ok(name) => name,
            Err(reason) => return Ok(self.reject(buf, stream, reason)),
        };

        let acceptor = self
            .inner
            .identities
            .get(&name)
            .cloned()
            .ok_or(CamouflageError::IdentityUnavailable(name))?;

        let tls_stream = acceptor
            .accept(PrefixedStream::new(buf, stream))
            .await
            .map_err(CamouflageError::HandshakeFailed)?;
        debug!("Reality handshake successful");

        Ok(Accepted::Tunnel(Box::new(tls_stream)))
    }

    /// 服务名 + session id 认证，返回要呈现的服务器名
    fn check(&self, hello: &ClientHelloInfo) -> Result<String, RejectReason> {
        let name = match &hello.server_name {
            Some(sni) => self
                .inner
                .server_names
                .iter()
                .find(|n| n.eq_ignore_ascii_case(sni))
                .cloned()
                .ok_or_else(|| RejectReason::ServerNameMismatch(Some(sni.clone())))?,
            None => self.inner.server_names[0].clone(),
        };

        let session = self.inner.auth.authenticate(hello, SystemTime::now())?;
        debug!(
            "Reality client authenticated (version {}, short id {})",
            session.version,
            hex::encode(session.short_id.0)
        );
        Ok(name)
    }

    fn reject<S>(&self, buf: BytesMut, stream: S, reason: RejectReason) -> Accepted<S> {
        if self.inner.show {
            info!("Reality 拒绝: {}", reason);
        } else {
            debug!("Reality 拒绝: {}", reason);
        }
        Accepted::Fallback {
            stream: PrefixedStream::new(buf, stream),
            reason,
        }
    }

    /// 将连接透明转发到目标站点，返回 (上行, 下行) 字节数
    pub async fn fallback<S>(&self, mut stream: PrefixedStream<S>) -> io::Result<(u64, u64)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let dest = &self.inner.dest;
        let mut dest_stream = tokio::time::timeout(FALLBACK_DIAL_TIMEOUT, TcpStream::connect(dest))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "fallback dial timed out"))??;
        let _ = dest_stream.set_nodelay(true);

        debug!("Falling back to {}", dest);
        tokio::io::copy_bidirectional(&mut stream, &mut dest_stream).await
    }
}

/// 预读连接开头判断是否为 TLS 握手，不消耗任何字节
///
/// 只有首字节为 0x16 且随后两字节为已知版本时返回 true；
/// 超时、EOF 或读错误均返回 false。
pub async fn looks_like_tls_handshake(stream: &TcpStream, wait: Duration) -> bool {
    let classify = async {
        loop {
            let ready = stream.ready(Interest::READABLE).await?;
            // 不足 3 字节时返回 WouldBlock，清除就绪状态，等待后续数据
            match stream.try_io(Interest::READABLE, || peek_record_start(stream)) {
                Ok(is_tls) => return Ok::<bool, io::Error>(is_tls),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if ready.is_read_closed() {
                        return Ok(false);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    };

    matches!(tokio::time::timeout(wait, classify).await, Ok(Ok(true)))
}

fn peek_record_start(stream: &TcpStream) -> io::Result<bool> {
    let mut buf = [MaybeUninit::new(0u8); 3];
    let n = SockRef::from(stream).peek(&mut buf)?;
    // SAFETY: 缓冲区已用 0 初始化
    let head: [u8; 3] = buf.map(|b| unsafe { b.assume_init() });

    if n == 0 || head[0] != CONTENT_TYPE_HANDSHAKE {
        return Ok(false);
    }
    if n < 3 {
        return Err(io::ErrorKind::WouldBlock.into());
    }
    Ok(hello_parser::is_tls_handshake(&head))
}

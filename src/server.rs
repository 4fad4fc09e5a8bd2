use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, info_span, warn, Dispatch, Instrument};
use uuid::Uuid;

use crate::config::{Config, Security, SockOpt};
use crate::handler;
use crate::network::{bind_listener, ConnectionManager};
use crate::registry::{ClientRecord, ClientRegistry};
use crate::transport::reality::{
    looks_like_tls_handshake, Accepted, CamouflageError, PrefixedStream, RejectReason,
};
use crate::transport::{RealityServer, TlsServer};
use crate::utils::ProxyError;

/// 建立阶段 (伪装 + 请求头 + 认证) 的绝对截止时间
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// 等待首个 TLS 记录头的时间
pub const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(10);

enum Camouflage {
    None,
    Tls(TlsServer),
    Reality(RealityServer),
}

/// 运行状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub clients_count: usize,
    pub port: u16,
    /// TLS 或 Reality 任一启用
    pub camouflage_enabled: bool,
    pub reality_enabled: bool,
    pub active_connections: usize,
}

/// 代理服务器
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    listen: String,
    port: AtomicU16,
    registry: ClientRegistry,
    camouflage: Camouflage,
    connections: ConnectionManager,
    sockopt: SockOpt,
    limiter: Option<Arc<Semaphore>>,
    dispatch: Dispatch,
}

impl Server {
    /// 创建新的服务器
    pub fn new(config: Config, dispatch: Dispatch) -> Result<Self> {
        let registry = ClientRegistry::from_config(&config)?;

        let camouflage = match config.camouflage() {
            Some(stream) if stream.security == Security::Reality => {
                let settings = stream
                    .reality_settings
                    .clone()
                    .ok_or_else(|| anyhow!("security 为 reality 但缺少 realitySettings"))?;
                Camouflage::Reality(RealityServer::new(settings)?)
            }
            Some(stream) if stream.security == Security::Tls => {
                let settings = stream
                    .tls_settings
                    .as_ref()
                    .ok_or_else(|| anyhow!("security 为 tls 但缺少 tlsSettings"))?;
                Camouflage::Tls(TlsServer::new(settings)?)
            }
            _ => Camouflage::None,
        };

        let limiter = config
            .max_connections
            .map(|max| Arc::new(Semaphore::new(max)));

        Ok(Self {
            inner: Arc::new(Inner {
                listen: config.listen.clone(),
                port: AtomicU16::new(config.port),
                registry,
                camouflage,
                connections: ConnectionManager::new(),
                sockopt: config.sockopt(),
                limiter,
                dispatch,
            }),
        })
    }

    /// 绑定配置的地址并运行，直到 `shutdown` 被取消
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = listen_addr(&self.inner.listen, self.port())?;
        let listener = {
            let _default = tracing::dispatcher::set_default(&self.inner.dispatch);
            bind_listener(addr, &self.inner.sockopt)
                .with_context(|| format!("无法监听 {}", addr))?
        };
        self.serve(listener, shutdown).await
    }

    /// 在已绑定的监听器上运行接受循环
    ///
    /// 取消后关闭监听器并返回；已接受的连接继续运行到自然结束。
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let dispatch = self.inner.dispatch.clone();
        self.accept_loop(listener, shutdown)
            .with_subscriber(dispatch)
            .await
    }

    async fn accept_loop(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local = listener.local_addr()?;
        self.inner.port.store(local.port(), Ordering::Relaxed);
        info!(
            addr = %local,
            reality = self.stats().reality_enabled,
            clients = self.inner.registry.len(),
            "开始监听"
        );
        if let Some(limiter) = &self.inner.limiter {
            info!("最大并发连接数: {}", limiter.available_permits());
        }

        loop {
            // 获取连接许可
            let permit = match &self.inner.limiter {
                Some(limiter) => tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    permit = limiter.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            error!("连接限制信号量已关闭");
                            break;
                        }
                    },
                },
                None => None,
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                        continue;
                    }
                },
            };

            debug!(peer = %peer, "新连接");
            if self.inner.sockopt.tcp_no_delay {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("设置 TCP_NODELAY 失败: {}", e);
                }
            }

            let inner = self.inner.clone();
            let span = info_span!("conn", peer = %peer);
            tokio::spawn(
                async move {
                    // 持有 permit 直到连接结束
                    let _permit = permit;
                    log_outcome(inner.handle_connection(stream).await);
                }
                .instrument(span)
                .with_subscriber(self.inner.dispatch.clone()),
            );
        }

        drop(listener);
        info!("停止接受新连接");
        Ok(())
    }

    /// 监听端口 (绑定后为实际端口)
    pub fn port(&self) -> u16 {
        self.inner.port.load(Ordering::Relaxed)
    }

    pub fn add_client(&self, record: ClientRecord) {
        self.inner.registry.add(record);
    }

    pub fn remove_client(&self, id: &Uuid) -> bool {
        self.inner.registry.remove(id)
    }

    pub fn list_clients(&self) -> Vec<ClientRecord> {
        self.inner.registry.list()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            clients_count: self.inner.registry.len(),
            port: self.port(),
            camouflage_enabled: !matches!(self.inner.camouflage, Camouflage::None),
            reality_enabled: matches!(self.inner.camouflage, Camouflage::Reality(_)),
            active_connections: self.inner.connections.active_count(),
        }
    }
}

impl Inner {
    /// 处理客户端连接
    async fn handle_connection(&self, stream: TcpStream) -> Result<(), ProxyError> {
        let deadline = Instant::now() + SETUP_TIMEOUT;

        match &self.camouflage {
            Camouflage::None => self.tunnel(stream, deadline).await,
            Camouflage::Tls(tls) => {
                let is_tls = self.classify(&stream, deadline).await;
                if !is_tls {
                    debug!("非 TLS 连接，关闭");
                    return Ok(());
                }
                let tls_stream = timeout_at(deadline, tls.accept(stream))
                    .await
                    .map_err(|_| ProxyError::SetupTimeout)?
                    .map_err(CamouflageError::HandshakeFailed)?;
                self.tunnel(tls_stream, deadline).await
            }
            Camouflage::Reality(reality) => {
                let is_tls = self.classify(&stream, deadline).await;
                if !is_tls {
                    let stream = PrefixedStream::new(BytesMut::new(), stream);
                    return self.fall_back(reality, stream, RejectReason::NotTls).await;
                }

                let accepted = timeout_at(deadline, reality.wrap(stream))
                    .await
                    .map_err(|_| ProxyError::SetupTimeout)??;
                match accepted {
                    Accepted::Tunnel(tls_stream) => self.tunnel(*tls_stream, deadline).await,
                    Accepted::Fallback { stream, reason } => {
                        self.fall_back(reality, stream, reason).await
                    }
                }
            }
        }
    }

    async fn classify(&self, stream: &TcpStream, deadline: Instant) -> bool {
        timeout_at(deadline, looks_like_tls_handshake(stream, CLASSIFY_TIMEOUT))
            .await
            .unwrap_or(false)
    }

    /// 伪装之后：请求头 + 认证仍受同一截止时间约束，然后连接目标并转发
    async fn tunnel<S>(&self, mut stream: S, deadline: Instant) -> Result<(), ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = timeout_at(deadline, handler::read_request(&mut stream, &self.registry))
            .await
            .map_err(|_| ProxyError::SetupTimeout)??;

        let stats =
            handler::serve_vless(stream, &request, self.sockopt.tcp_no_delay, &self.connections)
                .await?;
        info!(
            client = %request.client_id(),
            dest = %request.destination(),
            "连接关闭 - 上行: {} 字节, 下行: {} 字节",
            stats.uploaded,
            stats.downloaded
        );
        Ok(())
    }

    async fn fall_back(
        &self,
        reality: &RealityServer,
        stream: PrefixedStream<TcpStream>,
        reason: RejectReason,
    ) -> Result<(), ProxyError> {
        info!(
            reason = %reason,
            dest = %reality.dest(),
            buffered = stream.prefix().len(),
            "回落到目标站点"
        );
        match reality.fallback(stream).await {
            Ok((up, down)) => debug!("回落结束 - 上行: {} 字节, 下行: {} 字节", up, down),
            Err(e) => debug!("回落转发结束: {}", e),
        }
        Ok(())
    }
}

/// `listen` 可以是 IPv4、IPv6 (可带方括号) 地址
fn listen_addr(listen: &str, port: u16) -> Result<SocketAddr> {
    let host = listen.trim_start_matches('[').trim_end_matches(']');
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("无效的监听地址 {}", listen))?;
    Ok(SocketAddr::new(ip, port))
}

fn log_outcome(result: Result<(), ProxyError>) {
    let err = match result {
        Ok(()) => return,
        Err(err) => err,
    };
    match &err {
        ProxyError::Relay(e) => debug!("数据转发错误: {}", e),
        ProxyError::Io(e) => debug!("连接 IO 错误: {}", e),
        ProxyError::SetupTimeout => info!("{}", err),
        ProxyError::Decode(_) | ProxyError::UnsupportedCommand(_) => warn!("{}", err),
        ProxyError::Unauthorized(id) => warn!(client = %id, "认证失败"),
        ProxyError::Camouflage(_) | ProxyError::Dial { .. } | ProxyError::DialTimeout(_) => {
            warn!("{}", err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_ID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn plain_config() -> Config {
        Config::from_json(&format!(
            r#"{{ "listen": "127.0.0.1", "port": 10443, "maxConnections": 8,
                 "inbounds": [{{ "protocol": "vless", "port": 10443,
                     "settings": {{ "clients": [{{ "id": "{}" }}] }} }}] }}"#,
            CLIENT_ID
        ))
        .unwrap()
    }

    #[test]
    fn test_admin_operations() {
        let server = Server::new(plain_config(), Dispatch::none()).unwrap();
        assert_eq!(
            server.stats(),
            ServerStats {
                clients_count: 1,
                port: 10443,
                camouflage_enabled: false,
                reality_enabled: false,
                active_connections: 0,
            }
        );

        let id = Uuid::new_v4();
        server.add_client(ClientRecord::new(id));
        assert_eq!(server.list_clients().len(), 2);
        assert!(server.remove_client(&id));
        assert!(!server.remove_client(&id));
        assert_eq!(server.stats().clients_count, 1);
    }

    #[test]
    fn test_stats_serialize() {
        let server = Server::new(plain_config(), Dispatch::none()).unwrap();
        let json = serde_json::to_value(server.stats()).unwrap();
        assert_eq!(json["clients_count"], 1);
        assert_eq!(json["camouflage_enabled"], false);
        assert_eq!(json["reality_enabled"], false);
    }

    #[test]
    fn test_reality_enabled() {
        let mut config = plain_config();
        config.inbounds[0].stream_settings = Some(
            serde_json::from_str(
                r#"{ "security": "reality", "realitySettings": {
                    "dest": "127.0.0.1:1", "serverNames": ["www.example.com"],
                    "privateKey": "QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=",
                    "shortIds": [""] } }"#,
            )
            .unwrap(),
        );
        let server = Server::new(config, Dispatch::none()).unwrap();
        assert!(server.stats().camouflage_enabled);
        assert!(server.stats().reality_enabled);
    }

    #[test]
    fn test_no_clients_is_fatal() {
        let config = Config::from_json(
            r#"{ "port": 1, "inbounds": [{ "protocol": "vless", "port": 1,
                 "settings": { "clients": [] } }] }"#,
        )
        .unwrap();
        assert!(Server::new(config, Dispatch::none()).is_err());
    }

    #[test]
    fn test_listen_addr_accepts_ipv6() {
        assert_eq!(
            listen_addr("0.0.0.0", 443).unwrap(),
            "0.0.0.0:443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            listen_addr("::", 443).unwrap(),
            "[::]:443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            listen_addr("[::1]", 8443).unwrap(),
            "[::1]:8443".parse::<SocketAddr>().unwrap()
        );
        assert!(listen_addr("localhost", 443).is_err());
    }

    #[tokio::test]
    async fn test_run_binds_ipv6_loopback() {
        // 环境不支持 IPv6 时跳过
        if std::net::TcpListener::bind("[::1]:0").is_err() {
            return;
        }

        let mut config = plain_config();
        config.listen = "::1".to_string();
        config.port = 0;
        let server = Server::new(config, Dispatch::none()).unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let server = server.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { server.run(shutdown).await })
        };

        let port = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let port = server.port();
                if port != 0 {
                    return port;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        TcpStream::connect(("::1", port)).await.unwrap();

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    fn within_deadline(elapsed: Duration) -> bool {
        elapsed >= SETUP_TIMEOUT && elapsed < SETUP_TIMEOUT + Duration::from_secs(1)
    }

    fn stalled_header() -> Vec<u8> {
        let mut data = vec![0x00];
        data.extend_from_slice(Uuid::parse_str(CLIENT_ID).unwrap().as_bytes());
        data.extend_from_slice(&[0x00, 0x01]);
        data
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_header_hits_setup_deadline() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = Server::new(plain_config(), Dispatch::none()).unwrap();
        let (mut client, conn) = tokio::io::duplex(1024);
        client.write_all(&stalled_header()[..5]).await.unwrap();

        let start = Instant::now();
        let result = server.inner.tunnel(conn, start + SETUP_TIMEOUT).await;
        assert!(matches!(result, Err(ProxyError::SetupTimeout)));
        assert!(within_deadline(start.elapsed()));

        // 超时关闭，没有确认字节
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_deadline_is_not_reset_by_progress() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let server = Server::new(plain_config(), Dispatch::none()).unwrap();
        let (mut client, conn) = tokio::io::duplex(1024);
        let header = stalled_header();

        let writer = tokio::spawn(async move {
            client.write_all(&header[..10]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(20)).await;
            // 第二段仍不完整 (缺命令、端口、地址)
            client.write_all(&header[10..]).await.unwrap();
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let start = Instant::now();
        let result = server.inner.tunnel(conn, start + SETUP_TIMEOUT).await;
        assert!(matches!(result, Err(ProxyError::SetupTimeout)));
        // 从第二段数据起重新计时的话会在 50s 才超时
        assert!(within_deadline(start.elapsed()));
        assert!(writer.await.unwrap().is_empty());
    }
}

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::network::{relay, ConnectionManager, RelayStats};
use crate::protocol::vless::{Command, VlessRequest, VlessResponse};
use crate::registry::ClientRegistry;
use crate::utils::ProxyError;

/// 连接目标的超时，与建立阶段的截止时间无关
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// 读取 VLESS 请求头并认证
///
/// 只读取请求头本身，之后的负载仍留在流中。
pub async fn read_request<S>(
    stream: &mut S,
    registry: &ClientRegistry,
) -> Result<VlessRequest, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let request = VlessRequest::decode(stream).await?;
    debug!(
        client = %request.client_id(),
        dest = %request.destination(),
        "VLESS 请求: {:?}",
        request.command
    );

    if request.command != Command::Tcp {
        return Err(ProxyError::UnsupportedCommand(request.command));
    }
    if !registry.authenticate(&request.uuid) {
        return Err(ProxyError::Unauthorized(request.uuid));
    }

    Ok(request)
}

/// 连接目标地址
pub async fn dial(dest: &str, tcp_no_delay: bool) -> Result<TcpStream, ProxyError> {
    let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(dest))
        .await
        .map_err(|_| ProxyError::DialTimeout(dest.to_string()))?
        .map_err(|source| ProxyError::Dial {
            dest: dest.to_string(),
            source,
        })?;

    if tcp_no_delay {
        let _ = stream.set_nodelay(true);
    }
    Ok(stream)
}

/// 处理 VLESS 会话：连接目标，发送响应，然后双向转发
pub async fn serve_vless<S>(
    mut stream: S,
    request: &VlessRequest,
    tcp_no_delay: bool,
    connections: &ConnectionManager,
) -> Result<RelayStats, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let dest = request.destination();
    let remote = dial(&dest, tcp_no_delay).await?;

    let response = VlessResponse::new();
    stream.write_all(&response.encode()).await?;
    stream.flush().await?; // 确保响应已发送

    debug!(client = %request.client_id(), dest = %dest, "开始双向数据转发");
    let _guard = connections.track();
    relay(stream, remote).await.map_err(ProxyError::Relay)
}

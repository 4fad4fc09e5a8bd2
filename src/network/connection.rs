use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// 一次转发的字节统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// a -> b
    pub uploaded: u64,
    /// b -> a
    pub downloaded: u64,
}

/// 双向数据转发
///
/// 任一方向结束 (EOF 或错误) 即返回，另一方向不再等待；
/// 两端的流在返回时全部关闭。
pub async fn relay<A, B>(a: A, b: B) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let mut stats = RelayStats::default();
    let result = {
        let upload = pump(&mut a_read, &mut b_write, &mut stats.uploaded);
        let download = pump(&mut b_read, &mut a_write, &mut stats.downloaded);

        tokio::select! {
            r = upload => {
                debug!("上行方向结束");
                r
            }
            r = download => {
                debug!("下行方向结束");
                r
            }
        }
    };

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    result.map(|_| stats)
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, counter: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        *counter += n as u64;
    }
}

/// 连接管理器
#[derive(Clone, Default)]
pub struct ConnectionManager {
    /// 活跃连接数
    active_connections: Arc<AtomicUsize>,
}

impl ConnectionManager {
    /// 创建新的连接管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取活跃连接数
    pub fn active_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// 登记一个转发中的连接，guard 释放时计数减一
    pub fn track(&self) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            active_connections: self.active_connections.clone(),
        }
    }
}

pub struct ConnectionGuard {
    active_connections: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::SockOpt;

const LISTEN_BACKLOG: i32 = 1024;
#[cfg(target_os = "linux")]
const FAST_OPEN_QUEUE: libc::c_int = 256;

/// 使用 socket2 创建监听器以支持 TCP Fast Open
pub fn bind_listener(addr: SocketAddr, sockopt: &SockOpt) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    if sockopt.tcp_fast_open {
        enable_fast_open(&socket);
    }

    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;

    TcpListener::from_std(std::net::TcpListener::from(socket))
}

#[cfg(target_os = "linux")]
fn enable_fast_open(socket: &Socket) {
    use std::os::unix::io::AsRawFd;

    let val: libc::c_int = FAST_OPEN_QUEUE;
    // SAFETY: fd 在 socket 生命周期内有效，optval 指向一个 c_int
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        info!("TCP Fast Open 已启用 (队列长度: {})", FAST_OPEN_QUEUE);
    } else {
        warn!("启用 TCP Fast Open 失败: {}", io::Error::last_os_error());
    }
}

#[cfg(not(target_os = "linux"))]
fn enable_fast_open(_socket: &Socket) {
    warn!("当前平台不支持 TCP Fast Open，已忽略");
}

use std::io;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::vless::{Command, DecodeError};
use crate::transport::reality::CamouflageError;

/// 单个连接的错误，只影响所在连接
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("连接建立超时")]
    SetupTimeout,

    #[error("伪装层失败: {0}")]
    Camouflage(#[from] CamouflageError),

    #[error("VLESS 解码失败: {0}")]
    Decode(#[from] DecodeError),

    #[error("不支持的命令: {0:?}")]
    UnsupportedCommand(Command),

    #[error("未知客户端: {0}")]
    Unauthorized(Uuid),

    #[error("连接目标 {dest} 失败: {source}")]
    Dial {
        dest: String,
        #[source]
        source: io::Error,
    },

    #[error("连接目标 {0} 超时")]
    DialTimeout(String),

    #[error("数据转发错误: {0}")]
    Relay(#[source] io::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
}

use socketry_core::{ConnectionId, DomainError};
use thiserror::Error;

use crate::endpoint::EventKind;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("端点未找到: {0}")]
    EndpointNotFound(String),

    #[error("端点 {path} 重复声明了 {kind} handler")]
    DuplicateHandler { path: String, kind: EventKind },

    #[error("端点重复注册: {0}")]
    DuplicateEndpoint(String),

    #[error("路径模板非法: {0}")]
    InvalidPathTemplate(#[from] DomainError),

    #[error("handler 执行失败 (连接 {connection_id}): {message}")]
    HandlerInvocation {
        connection_id: ConnectionId,
        message: String,
    },

    #[error("连接 {connection_id} 队列已满: {reason}")]
    Backpressure {
        connection_id: ConnectionId,
        reason: String,
    },

    #[error("连接已关闭: {0}")]
    ConnectionClosed(ConnectionId),

    /// 配置校验失败；读取与解析配置文件的错误以 `anyhow` 返回。
    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

//! 协议错误类型定义

/// 串口通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 端口未被枚举到
    #[error("port not found: {0}")]
    PortNotFound(String),

    /// 端口打开失败
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 写超时
    #[error("write timeout on {0}")]
    WriteTimeout(String),

    /// 等待端口租约超时
    #[error("lease timeout on {0}")]
    LeaseTimeout(String),

    /// 对端关闭
    #[error("connection closed: {0}")]
    Closed(String),

    /// 报文编解码错误
    #[error("codec error: {0}")]
    Codec(String),
}

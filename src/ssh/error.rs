// SSH 错误类型定义

use thiserror::Error;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 错误（网络连接等）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 认证失败
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 服务器公钥与配置中固定的指纹不一致
    #[error("Host key rejected: expected fingerprint {0}")]
    HostKeyMismatch(String),

    /// 连接超时
    #[error("Connection timeout after {0}s")]
    Timeout(u64),

    /// 通道创建超时
    #[error("Channel creation timed out after {0}s")]
    ChannelTimeout(u64),

    /// 通道错误
    #[error("Channel error: {0}")]
    Channel(String),

    /// 通道已失效（远端关闭、IO 错误或连接关闭）
    #[error("Channel inactive")]
    ChannelInactive,

    /// 通道尚未准备好
    #[error("Channel not prepared")]
    NotPrepared,

    /// 没有活跃连接
    #[error("No active connection")]
    NotConnected,

    /// 连接已关闭，不能再次使用
    #[error("Connection closed")]
    Closed,
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::Error> for SshError {
    fn from(e: russh::keys::Error) -> Self {
        SshError::Key(e.to_string())
    }
}

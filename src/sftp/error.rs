// SFTP 错误类型定义

use std::time::Duration;

use thiserror::Error;

use super::protocol::StatusCode;
use crate::ssh::SshError;

/// SFTP 错误类型
#[derive(Debug, Error)]
pub enum SftpError {
    /// 底层 SSH 错误
    #[error(transparent)]
    Ssh(SshError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 服务器返回的失败状态
    #[error("{message} ({code})")]
    Status { code: StatusCode, message: String },

    /// 消息格式错误或不符合预期
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// 未知消息类型
    #[error("Unsupported SFTP message type: {0}")]
    UnsupportedMessage(u8),

    /// 服务器版本高于客户端支持的版本
    #[error("Unsupported server version {server} (client supports {client})")]
    UnsupportedVersion { server: u32, client: u32 },

    /// 请求超时
    #[error("SFTP request {id} timed out after {after:?}")]
    Timeout { id: u32, after: Duration },

    /// 通道已失效
    #[error("Channel inactive")]
    ChannelInactive,

    /// 句柄已关闭
    #[error("Handle already closed")]
    ClosedHandle,
}

impl From<SshError> for SftpError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::ChannelInactive => SftpError::ChannelInactive,
            other => SftpError::Ssh(other),
        }
    }
}

impl SftpError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        SftpError::Protocol(message.into())
    }

    /// 服务器状态码（如果是状态错误）
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            SftpError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否是“文件不存在”
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NoSuchFile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_carries_server_text() {
        let err = SftpError::Status {
            code: StatusCode::PermissionDenied,
            message: "Permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "Permission denied (PERMISSION_DENIED)");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_inactive_ssh_error_maps_to_channel_inactive() {
        assert!(matches!(
            SftpError::from(SshError::ChannelInactive),
            SftpError::ChannelInactive
        ));
        assert!(matches!(
            SftpError::from(SshError::NotConnected),
            SftpError::Ssh(SshError::NotConnected)
        ));
    }
}

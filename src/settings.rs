// 客户端设置（持久化用）

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHANNEL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CHILDREN,
    DEFAULT_MAX_DIRECTORY_SIZE, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use crate::ssh::{KeepaliveConfig, SshConfig};
use crate::tree::TraversalPolicy;

// ======================== 主配置结构 ========================

/// 客户端设置
/// 缺失的字段使用默认值，旧版本的配置文件可以直接加载
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub connection: ConnectionSettings,
    pub sftp: SftpSettings,
    pub traversal: TraversalSettings,
}

// ======================== 连接设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub default_port: u16,
    pub connection_timeout_secs: u64,
    /// 子通道创建超时
    pub channel_timeout_secs: u64,
    pub keepalive_enabled: bool,
    pub keepalive_interval_secs: u64,
    pub keepalive_max_retries: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            default_port: 22,
            connection_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            channel_timeout_secs: DEFAULT_CHANNEL_TIMEOUT_SECS,
            keepalive_enabled: true,
            keepalive_interval_secs: 60,
            keepalive_max_retries: 3,
        }
    }
}

// ======================== SFTP 设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpSettings {
    /// 单个请求超时，null 表示不限时
    pub request_timeout_secs: Option<u64>,
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

// ======================== 目录遍历设置 ========================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalSettings {
    pub max_directory_size: u64,
    pub max_children: usize,
    pub allow_large_folders: bool,
    pub fail_fast: bool,
}

impl Default for TraversalSettings {
    fn default() -> Self {
        Self {
            max_directory_size: DEFAULT_MAX_DIRECTORY_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            allow_large_folders: false,
            fail_fast: false,
        }
    }
}

impl ClientSettings {
    /// 把设置中的超时与心跳写入连接配置
    pub fn apply_to(&self, config: &mut SshConfig) {
        let connection = &self.connection;
        config.connect_timeout = connection.connection_timeout_secs;
        config.channel_timeout = connection.channel_timeout_secs;
        config.request_timeout = self.sftp.request_timeout_secs;
        config.keepalive = KeepaliveConfig {
            enabled: connection.keepalive_enabled,
            interval: connection.keepalive_interval_secs,
            max_retries: connection.keepalive_max_retries,
        };
    }

    pub fn traversal_policy(&self) -> TraversalPolicy {
        TraversalPolicy {
            max_directory_size: self.traversal.max_directory_size,
            max_children: self.traversal.max_children,
            allow_large_folders: self.traversal.allow_large_folders,
            fail_fast: self.traversal.fail_fast,
        }
    }
}

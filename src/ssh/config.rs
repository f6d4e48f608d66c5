// SSH 连接配置

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CHANNEL_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// SSH 连接配置
#[derive(Clone, Debug)]
pub struct SshConfig {
    /// 目标主机
    pub host: String,
    /// 端口
    pub port: u16,
    /// 用户名
    pub username: String,
    /// 认证方式
    pub auth: AuthMethod,
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 子通道创建超时（秒）
    pub channel_timeout: u64,
    /// SFTP 单个请求超时（秒），None 表示不限时
    pub request_timeout: Option<u64>,
    /// 心跳配置
    pub keepalive: KeepaliveConfig,
    /// 固定的服务器公钥指纹（SHA256:...），None 表示接受任意公钥
    pub host_key_fingerprint: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            username: String::new(),
            auth: AuthMethod::Password(String::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT_SECS,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
            keepalive: KeepaliveConfig::default(),
            host_key_fingerprint: None,
        }
    }
}

/// 认证方式
#[derive(Clone, Debug)]
pub enum AuthMethod {
    /// 密码认证
    Password(String),
    /// 公钥认证
    PublicKey {
        /// 私钥文件路径
        key_path: PathBuf,
        /// 私钥密码（如果有）
        passphrase: Option<String>,
    },
}

/// 心跳配置
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// 是否启用心跳
    pub enabled: bool,
    /// 心跳间隔（秒）
    pub interval: u64,
    /// 最大重试次数
    pub max_retries: u32,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 60,
            max_retries: 3,
        }
    }
}

impl SshConfig {
    /// 构建 russh 配置
    pub fn to_russh_config(&self) -> russh::client::Config {
        let mut config = russh::client::Config::default();
        // russh 没有单独的 connection_timeout，这里用 inactivity_timeout
        config.inactivity_timeout = Some(Duration::from_secs(self.connect_timeout));
        if self.keepalive.enabled {
            config.keepalive_interval = Some(Duration::from_secs(self.keepalive.interval));
            config.keepalive_max = self.keepalive.max_retries as usize;
        }
        config
    }

    /// 子通道创建超时
    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout)
    }

    /// SFTP 请求超时
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_secs)
    }

    /// 目标地址（host:port）
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), super::SshError> {
        if self.host.trim().is_empty() {
            return Err(super::SshError::Config("Host is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(super::SshError::Config("Username is empty".to_string()));
        }
        if self.channel_timeout == 0 {
            return Err(super::SshError::Config(
                "Channel timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

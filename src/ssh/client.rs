// SSH 客户端核心实现
// 负责 TCP 连接、握手与认证，产出已认证的 russh Handle

use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh::client::Handle;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::config::{AuthMethod, SshConfig};
use super::error::SshError;
use super::event::{ConnectionStage, EventSink, LogEntry};
use super::handler::SshClientHandler;

/// SSH 客户端
pub struct SshClient<'a> {
    /// 连接配置
    config: &'a SshConfig,
    /// 事件出口
    events: EventSink,
}

impl<'a> SshClient<'a> {
    pub fn new(config: &'a SshConfig, events: EventSink) -> Self {
        Self { config, events }
    }

    fn log(&self, entry: LogEntry) {
        self.events.log(entry);
    }

    /// 执行连接
    /// 返回已认证的 Handle
    pub async fn connect(&self) -> Result<Handle<SshClientHandler>, SshError> {
        self.config.validate()?;

        self.events.stage(ConnectionStage::Initializing);
        self.log(LogEntry::debug(format!(
            "Target: {}@{}",
            self.config.username,
            self.config.address()
        )));

        let addr = self.config.address();
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::Config(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::Config("No valid address found".to_string()))?;

        // TCP 连接
        self.events.stage(ConnectionStage::ConnectingHost);
        self.log(LogEntry::info(format!("Connecting to {}...", socket_addr)));

        let connect_timeout = Duration::from_secs(self.config.connect_timeout);
        let tcp_stream = timeout(connect_timeout, TcpStream::connect(socket_addr))
            .await
            .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
            .map_err(SshError::Io)?;

        self.log(LogEntry::info("TCP connection established"));

        // SSH 握手
        self.events.stage(ConnectionStage::Handshaking);
        let russh_config = Arc::new(self.config.to_russh_config());
        let handler = SshClientHandler::new(
            self.events.clone(),
            self.config.host.clone(),
            self.config.host_key_fingerprint.clone(),
        );

        let mut handle = timeout(
            connect_timeout,
            russh::client::connect_stream(russh_config, tcp_stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(self.config.connect_timeout))?
        .map_err(|e| match (&e, &self.config.host_key_fingerprint) {
            (russh::Error::UnknownKey, Some(expected)) => {
                SshError::HostKeyMismatch(expected.clone())
            }
            _ => SshError::from(e),
        })?;

        self.log(LogEntry::info("SSH handshake completed"));

        // 认证
        self.events.stage(ConnectionStage::Authenticating);
        self.log(LogEntry::info(format!(
            "Authenticating as '{}'...",
            self.config.username
        )));

        self.authenticate(&mut handle).await?;

        self.log(LogEntry::info("Authentication successful"));
        self.events.stage(ConnectionStage::Connected);

        Ok(handle)
    }

    /// 执行认证
    async fn authenticate(&self, handle: &mut Handle<SshClientHandler>) -> Result<(), SshError> {
        use russh::client::AuthResult;

        let (method, auth_result) = match &self.config.auth {
            AuthMethod::Password(password) => {
                self.log(LogEntry::debug("Using password authentication"));
                let result = handle
                    .authenticate_password(&self.config.username, password)
                    .await
                    .map_err(SshError::from)?;
                ("Password", result)
            }
            AuthMethod::PublicKey {
                key_path,
                passphrase,
            } => {
                self.log(LogEntry::debug(format!(
                    "Using public key authentication: {:?}",
                    key_path
                )));

                let key = self
                    .load_private_key(key_path, passphrase.as_deref())
                    .await?;
                let key_with_alg = russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None);

                let result = handle
                    .authenticate_publickey(&self.config.username, key_with_alg)
                    .await
                    .map_err(SshError::from)?;
                ("Public key", result)
            }
        };

        match auth_result {
            AuthResult::Success => Ok(()),
            AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                if partial_success {
                    return Err(SshError::Auth(
                        "Partial authentication - additional auth required".to_string(),
                    ));
                }
                Err(SshError::Auth(format!(
                    "{} authentication failed. Server suggests: {:?}",
                    method, remaining_methods
                )))
            }
        }
    }

    /// 加载私钥文件
    async fn load_private_key(
        &self,
        key_path: &Path,
        passphrase: Option<&str>,
    ) -> Result<russh::keys::PrivateKey, SshError> {
        let key_data = tokio::fs::read(key_path)
            .await
            .map_err(|e| SshError::Key(format!("Failed to read key file: {}", e)))?;

        let key = russh::keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
            .map_err(|e| SshError::Key(format!("Failed to decode key: {}", e)))?;

        self.log(LogEntry::debug("Private key loaded successfully"));
        Ok(key)
    }
}

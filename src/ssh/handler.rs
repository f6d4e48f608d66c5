// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait

use russh::keys::PublicKey;
use std::future::Future;

use super::event::{EventSink, LogEntry};

/// SSH 客户端 Handler
/// 处理握手过程中的服务器公钥校验
pub struct SshClientHandler {
    /// 事件出口
    events: EventSink,
    /// 服务器主机名（用于日志）
    host: String,
    /// 固定的公钥指纹
    expected_fingerprint: Option<String>,
}

impl SshClientHandler {
    pub fn new(events: EventSink, host: String, expected_fingerprint: Option<String>) -> Self {
        Self {
            events,
            host,
            expected_fingerprint,
        }
    }
}

/// 比较指纹（忽略首尾空白）
pub(crate) fn fingerprint_matches(expected: &str, actual: &str) -> bool {
    expected.trim() == actual.trim()
}

impl russh::client::Handler for SshClientHandler {
    type Error = russh::Error;

    /// 检查服务器公钥
    /// 配置了固定指纹时必须一致，否则接受并记录指纹
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
            .to_string();

        self.events.log(LogEntry::info(format!(
            "Server key fingerprint for {}: {}",
            self.host, fingerprint
        )));
        self.events.log(LogEntry::debug(format!(
            "Server key type: {}",
            server_public_key.algorithm()
        )));

        let accepted = match &self.expected_fingerprint {
            Some(expected) if !fingerprint_matches(expected, &fingerprint) => {
                self.events.log(LogEntry::error(format!(
                    "Host key mismatch: expected {}, got {}",
                    expected, fingerprint
                )));
                false
            }
            _ => true,
        };

        async move { Ok(accepted) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_matches_trims() {
        assert!(fingerprint_matches(" SHA256:abc ", "SHA256:abc"));
        assert!(!fingerprint_matches("SHA256:abc", "SHA256:abd"));
    }
}

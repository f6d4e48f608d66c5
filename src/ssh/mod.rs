// SSH 连接模块
//
// 模块结构:
// - config: 连接配置 (SshConfig, AuthMethod)
// - error: 错误类型 (SshError)
// - event: 连接事件 (ConnectionEvent, ConnectionStage, LogEntry)
// - handler: russh Handler 实现
// - client: TCP 连接、握手与认证
// - channel: 子通道抽象与状态
// - connection: 连接管理 (SshConnection)
// - shell / pty: Shell 命令通道与伪终端

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod handler;
pub mod pty;
pub mod shell;

// 公开导出
pub use channel::{ChannelKind, ChannelState};
pub use client::SshClient;
pub use config::{AuthMethod, KeepaliveConfig, SshConfig};
pub use connection::{ChannelInfo, ConnectionState, SshConnection};
pub use error::SshError;
pub use event::{ConnectionEvent, ConnectionStage, EventSink, LogEntry, LogLevel};
pub use pty::{PtyRequest, TerminalChannel};
pub use shell::{CommandOutput, ShellChannel};

// 子通道抽象
//
// 所有协议处理（Shell、PTY、SFTP）只依赖 ChannelTransport，
// 生产环境由 russh 通道实现，测试中由内存通道实现。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::ChannelMsg;

use super::error::SshError;

/// 子通道类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// 交互式 Shell（哨兵分帧执行命令）
    Shell,
    /// 伪终端
    PseudoTerminal,
    /// SFTP 子系统
    FileTransfer,
    /// 一次性 exec
    Exec,
}

/// 子通道状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// 已分配，尚未完成创建
    Uninitialized,
    /// 可用
    Active,
    /// 已失效（远端关闭、IO 错误或连接关闭）
    Inactive,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Active,
            _ => Self::Inactive,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Active => 1,
            Self::Inactive => 2,
        }
    }
}

/// 共享的通道状态
/// 连接与通道句柄各持一份，连接关闭时可以直接置为 Inactive
#[derive(Clone, Debug)]
pub struct ChannelStateCell(Arc<AtomicU8>);

impl Default for ChannelStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStateCell {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ChannelState::Uninitialized.as_u8())))
    }

    pub fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Uninitialized -> Active，已失效的通道不会被重新激活
    pub fn activate(&self) -> bool {
        self.0
            .compare_exchange(
                ChannelState::Uninitialized.as_u8(),
                ChannelState::Active.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn deactivate(&self) {
        self.0
            .store(ChannelState::Inactive.as_u8(), Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.get() == ChannelState::Active
    }

    /// 每个操作入口的状态检查
    pub fn ensure_active(&self) -> Result<(), SshError> {
        match self.get() {
            ChannelState::Active => Ok(()),
            ChannelState::Uninitialized => Err(SshError::NotPrepared),
            ChannelState::Inactive => Err(SshError::ChannelInactive),
        }
    }
}

/// 通道上收到的事件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// 标准输出 / 协议数据
    Data(Vec<u8>),
    /// 扩展数据（ext == 1 为 stderr）
    ExtendedData { ext: u32, data: Vec<u8> },
    /// 远端进程退出码
    ExitStatus(u32),
    /// 远端 EOF
    Eof,
    /// 通道关闭
    Closed,
}

/// 扩展数据类型：stderr
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// 子通道传输
///
/// `recv` 必须是取消安全的：调用方会在 `tokio::select!` 中使用它。
#[async_trait]
pub trait ChannelTransport: Send + 'static {
    /// 写入数据
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError>;

    /// 读取下一个事件，None 表示通道已不可读
    async fn recv(&mut self) -> Option<ChannelEvent>;

    /// 调整终端窗口大小
    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError>;

    /// 关闭通道
    async fn close(&mut self) -> Result<(), SshError>;
}

// 使用 russh::client::Msg 作为消息类型
pub type RusshChannel = russh::Channel<Msg>;

/// russh 通道实现
pub struct RusshTransport {
    channel: RusshChannel,
}

impl RusshTransport {
    pub fn new(channel: RusshChannel) -> Self {
        Self { channel }
    }

    pub fn id(&self) -> russh::ChannelId {
        self.channel.id()
    }
}

#[async_trait]
impl ChannelTransport for RusshTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.channel
            .data(data)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => ChannelEvent::Data(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } => ChannelEvent::ExtendedData {
                    ext,
                    data: data.to_vec(),
                },
                ChannelMsg::ExitStatus { exit_status } => ChannelEvent::ExitStatus(exit_status),
                ChannelMsg::Eof => ChannelEvent::Eof,
                ChannelMsg::Close => ChannelEvent::Closed,
                // 窗口调整、请求应答等不影响上层协议
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.channel
            .eof()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        self.channel
            .close()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))
    }
}

// SSH 连接事件定义

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use super::channel::ChannelKind;

/// 连接事件（供调用方展示连接进度）
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    /// 阶段变化
    StageChanged(ConnectionStage),
    /// 日志消息
    Log(LogEntry),
    /// 连接成功
    Connected { connection_id: String },
    /// 连接失败
    Failed { error: String },
    /// 子通道已打开
    ChannelOpened { channel_id: u64, kind: ChannelKind },
    /// 连接断开
    Disconnected { reason: String },
}

/// 连接阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionStage {
    /// 初始化（解析配置、准备连接）
    Initializing = 0,
    /// TCP 连接目标主机
    ConnectingHost = 1,
    /// SSH 握手（密钥交换）
    Handshaking = 2,
    /// 身份认证
    Authenticating = 3,
    /// 连接完成
    Connected = 4,
}

impl ConnectionStage {
    /// 阶段名称
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::ConnectingHost => "Connecting to host",
            Self::Handshaking => "SSH handshake",
            Self::Authenticating => "Authenticating",
            Self::Connected => "Connected",
        }
    }

    /// 进度百分比 (0.0 - 1.0)
    pub fn progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::ConnectingHost => 0.25,
            Self::Handshaking => 0.5,
            Self::Authenticating => 0.75,
            Self::Connected => 1.0,
        }
    }
}

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// 日志条目
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// 时间戳
    pub timestamp: DateTime<Local>,
    /// 日志级别
    pub level: LogLevel,
    /// 消息内容
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// 事件出口
/// 同时写入 tracing 日志；未订阅时事件被丢弃
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl EventSink {
    pub fn new(sender: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// 不订阅事件
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ConnectionEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn stage(&self, stage: ConnectionStage) {
        tracing::debug!("[SSH] Stage: {}", stage.label());
        self.emit(ConnectionEvent::StageChanged(stage));
    }

    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!("[SSH] {}", entry.message),
            LogLevel::Info => tracing::info!("[SSH] {}", entry.message),
            LogLevel::Warn => tracing::warn!("[SSH] {}", entry.message),
            LogLevel::Error => tracing::error!("[SSH] {}", entry.message),
        }
        self.emit(ConnectionEvent::Log(entry));
    }
}

// SSH 连接管理
//
// 一个连接持有一条已认证的 SSH 传输，在其上创建 Shell / PTY / SFTP 子通道。
// 子通道创建与超时竞争，先完成的一方决定结果；关闭连接会使全部子通道失效。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use russh::client::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::{
    ChannelEvent, ChannelKind, ChannelState, ChannelStateCell, ChannelTransport, RusshChannel,
    RusshTransport, EXTENDED_DATA_STDERR,
};
use super::client::SshClient;
use super::config::SshConfig;
use super::error::SshError;
use super::event::{ConnectionEvent, EventSink, LogEntry};
use super::handler::SshClientHandler;
use super::pty::{PtyRequest, TerminalChannel};
use super::shell::{CommandOutput, ShellChannel};
use crate::sftp::{SftpClient, SftpError, SftpOptions};

/// 连接生命周期
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

/// 子通道快照
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: u64,
    pub kind: ChannelKind,
    pub state: ChannelState,
}

struct ChildChannel {
    id: u64,
    kind: ChannelKind,
    state: ChannelStateCell,
}

struct Inner {
    state: ConnectionState,
    handle: Option<Arc<Handle<SshClientHandler>>>,
    children: Vec<ChildChannel>,
}

/// SSH 连接
pub struct SshConnection {
    /// 连接 ID
    id: String,
    config: SshConfig,
    events: EventSink,
    inner: Mutex<Inner>,
    /// 所有子通道的取消令牌都派生自它
    cancel: CancellationToken,
    next_channel_id: AtomicU64,
}

/// 让创建过程与超时竞争
/// 超时后创建过程被丢弃；创建先完成时定时器随之取消
pub(crate) async fn race_creation<T, E, F>(timeout: Duration, creation: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<SshError>,
{
    match tokio::time::timeout(timeout, creation).await {
        Ok(result) => result,
        Err(_) => Err(SshError::ChannelTimeout(timeout.as_secs()).into()),
    }
}

impl SshConnection {
    pub fn new(config: SshConfig, events: EventSink) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            events,
            inner: Mutex::new(Inner {
                state: ConnectionState::Unconnected,
                handle: None,
                children: Vec::new(),
            }),
            cancel: CancellationToken::new(),
            next_channel_id: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ConnectionState {
        self.observe_transport().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// 建立并认证传输
    pub async fn connect(&self) -> Result<(), SshError> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(SshError::Closed),
            ConnectionState::Unconnected => {}
        }

        let label = format!("{}@{}", self.config.username, self.config.host);
        info!("[SSH] [{}] Connecting...", label);

        let handle = match SshClient::new(&self.config, self.events.clone()).connect().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("[SSH] [{}] Connection failed: {}", label, e);
                self.events.emit(ConnectionEvent::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        {
            let mut inner = self.inner();
            // 连接过程中被关闭
            if inner.state == ConnectionState::Closed {
                return Err(SshError::Closed);
            }
            inner.state = ConnectionState::Connected;
            inner.handle = Some(Arc::new(handle));
        }

        info!("[SSH] [{}] Connected ({})", label, self.id);
        self.events.emit(ConnectionEvent::Connected {
            connection_id: self.id.clone(),
        });
        Ok(())
    }

    /// 检查传输是否仍然存活，断开时切换到 Closed 并让所有子通道失效
    /// 子通道保留在列表中（状态为 Inactive），下次登记时再清理
    fn observe_transport(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner();
        let lost = inner.state == ConnectionState::Connected
            && inner
                .handle
                .as_ref()
                .map_or(true, |handle| handle.is_closed());
        if !lost {
            return inner;
        }

        warn!("[SSH] [{}] Transport lost", self.id);
        inner.state = ConnectionState::Closed;
        inner.handle = None;
        for child in &inner.children {
            child.state.deactivate();
        }
        self.cancel.cancel();
        self.events.emit(ConnectionEvent::Disconnected {
            reason: "Transport lost".to_string(),
        });
        inner
    }

    /// 当前可用的传输
    fn transport(&self) -> Result<Arc<Handle<SshClientHandler>>, SshError> {
        let inner = self.observe_transport();
        match (inner.state, inner.handle.as_ref()) {
            (ConnectionState::Unconnected, _) => Err(SshError::NotConnected),
            (ConnectionState::Connected, Some(handle)) => Ok(handle.clone()),
            _ => Err(SshError::Closed),
        }
    }

    /// 分配子通道 id 并登记
    fn register_child(&self, kind: ChannelKind) -> (u64, ChannelStateCell) {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let state = ChannelStateCell::new();
        let mut inner = self.inner();
        inner
            .children
            .retain(|child| child.state.get() != ChannelState::Inactive);
        inner.children.push(ChildChannel {
            id,
            kind,
            state: state.clone(),
        });
        (id, state)
    }

    fn finish_creation<T, E: std::fmt::Display>(
        &self,
        id: u64,
        kind: ChannelKind,
        state: &ChannelStateCell,
        result: Result<T, E>,
    ) -> Result<T, E> {
        match result {
            Ok(value) => {
                state.activate();
                debug!("[SSH] [{}] Opened {:?} channel {}", self.id, kind, id);
                self.events.emit(ConnectionEvent::ChannelOpened {
                    channel_id: id,
                    kind,
                });
                Ok(value)
            }
            Err(e) => {
                state.deactivate();
                self.events.log(LogEntry::warn(format!(
                    "Failed to open {:?} channel: {}",
                    kind, e
                )));
                Err(e)
            }
        }
    }

    /// 当前登记的子通道
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.observe_transport()
            .children
            .iter()
            .map(|child| ChannelInfo {
                id: child.id,
                kind: child.kind,
                state: child.state.get(),
            })
            .collect()
    }

    /// 创建 Shell 命令通道
    pub async fn create_shell(&self) -> Result<ShellChannel, SshError> {
        let handle = self.transport()?;
        let (id, state) = self.register_child(ChannelKind::Shell);

        let creation = async {
            let channel = handle.channel_open_session().await?;
            channel.request_shell(true).await?;
            Ok::<RusshChannel, SshError>(channel)
        };
        let result = race_creation(self.config.channel_timeout(), creation).await;
        let channel = self.finish_creation(id, ChannelKind::Shell, &state, result)?;

        Ok(ShellChannel::new(
            id,
            RusshTransport::new(channel),
            state,
            self.cancel.child_token(),
        ))
    }

    /// 创建伪终端
    pub async fn create_pseudo_terminal(
        &self,
        pty: PtyRequest,
    ) -> Result<TerminalChannel, SshError> {
        let handle = self.transport()?;
        let (id, state) = self.register_child(ChannelKind::PseudoTerminal);

        let creation = async {
            let channel = handle.channel_open_session().await?;
            channel
                .request_pty(
                    false,
                    &pty.term,
                    pty.col_width,
                    pty.row_height,
                    pty.pix_width,
                    pty.pix_height,
                    &pty.modes,
                )
                .await?;
            channel.request_shell(false).await?;
            Ok::<RusshChannel, SshError>(channel)
        };
        let result = race_creation(self.config.channel_timeout(), creation).await;
        let channel = self.finish_creation(id, ChannelKind::PseudoTerminal, &state, result)?;

        Ok(TerminalChannel::spawn(
            id,
            RusshTransport::new(channel),
            state,
            self.cancel.child_token(),
        ))
    }

    /// 创建 SFTP 客户端（打开子系统并完成版本协商）
    pub async fn create_file_transfer_client(&self) -> Result<SftpClient, SftpError> {
        let handle = self.transport()?;
        let (id, state) = self.register_child(ChannelKind::FileTransfer);
        let options = SftpOptions {
            request_timeout: self.config.request_timeout(),
        };
        let cancel = self.cancel.child_token();

        let creation = async {
            let channel = handle.channel_open_session().await.map_err(SshError::from)?;
            channel
                .request_subsystem(true, "sftp")
                .await
                .map_err(SshError::from)?;
            crate::sftp::client::start(
                id,
                RusshTransport::new(channel),
                options,
                state.clone(),
                cancel,
            )
            .await
        };
        let result = race_creation(self.config.channel_timeout(), creation).await;
        self.finish_creation(id, ChannelKind::FileTransfer, &state, result)
    }

    /// 在独立的 exec 通道上执行一条命令，返回输出与退出码
    pub async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let handle = self.transport()?;
        let (id, state) = self.register_child(ChannelKind::Exec);

        let creation = async {
            let channel = handle.channel_open_session().await?;
            channel.exec(true, command).await?;
            Ok::<RusshChannel, SshError>(channel)
        };
        let result = race_creation(self.config.channel_timeout(), creation).await;
        let channel = self.finish_creation(id, ChannelKind::Exec, &state, result)?;

        let output = collect_exec_output(
            RusshTransport::new(channel),
            &state,
            &self.cancel.child_token(),
        )
        .await;
        state.deactivate();
        output
    }

    /// 关闭连接，所有子通道失效
    pub async fn close(&self) -> Result<(), SshError> {
        let handle = {
            let mut inner = self.inner();
            if inner.state == ConnectionState::Closed {
                return Ok(());
            }
            inner.state = ConnectionState::Closed;
            for child in inner.children.drain(..) {
                child.state.deactivate();
            }
            inner.handle.take()
        };
        self.cancel.cancel();

        if let Some(handle) = handle {
            if let Err(e) = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
            {
                warn!("[SSH] [{}] Disconnect failed: {}", self.id, e);
            }
        }

        info!("[SSH] [{}] Connection closed", self.id);
        self.events.emit(ConnectionEvent::Disconnected {
            reason: "Closed by client".to_string(),
        });
        Ok(())
    }
}

/// 收集 exec 通道的输出，直到通道关闭
async fn collect_exec_output<T: ChannelTransport>(
    mut transport: T,
    state: &ChannelStateCell,
    cancel: &CancellationToken,
) -> Result<CommandOutput, SshError> {
    let mut output = CommandOutput::default();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                state.deactivate();
                return Err(SshError::ChannelInactive);
            }
            event = transport.recv() => event,
        };
        match event {
            Some(ChannelEvent::Data(data)) => output.stdout.extend_from_slice(&data),
            Some(ChannelEvent::ExtendedData { ext, data }) => {
                if ext == EXTENDED_DATA_STDERR {
                    output.stderr.extend_from_slice(&data);
                }
            }
            // 退出码可能在 EOF 之后才到达
            Some(ChannelEvent::ExitStatus(code)) => output.exit_code = Some(code),
            Some(ChannelEvent::Eof) => {}
            Some(ChannelEvent::Closed) | None => break,
        }
    }
    Ok(output)
}

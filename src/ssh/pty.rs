// 伪终端通道
// 由独立任务独占底层通道：写入、调整大小与读取都经由该任务串行处理

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{ChannelEvent, ChannelStateCell, ChannelTransport};
use super::error::SshError;

/// PTY 请求参数
#[derive(Clone, Debug)]
pub struct PtyRequest {
    /// 终端类型
    pub term: String,
    /// 列数
    pub col_width: u32,
    /// 行数
    pub row_height: u32,
    /// 像素宽度
    pub pix_width: u32,
    /// 像素高度
    pub pix_height: u32,
    /// 终端模式
    pub modes: Vec<(russh::Pty, u32)>,
}

impl Default for PtyRequest {
    fn default() -> Self {
        Self {
            term: "xterm-256color".to_string(),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            modes: vec![],
        }
    }
}

enum TerminalCommand {
    Send(Vec<u8>, oneshot::Sender<Result<(), SshError>>),
    Resize {
        cols: u32,
        rows: u32,
        reply: oneshot::Sender<Result<(), SshError>>,
    },
    Close(oneshot::Sender<Result<(), SshError>>),
}

/// 终端通道
pub struct TerminalChannel {
    id: u64,
    commands: mpsc::UnboundedSender<TerminalCommand>,
    output: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    state: ChannelStateCell,
}

impl TerminalChannel {
    /// 启动读写任务
    pub(crate) fn spawn<T: ChannelTransport>(
        id: u64,
        transport: T,
        state: ChannelStateCell,
        cancel: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_terminal_loop(
            id,
            transport,
            cmd_rx,
            out_tx,
            state.clone(),
            cancel,
        ));

        Self {
            id,
            commands: cmd_tx,
            output: Some(out_rx),
            state,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), SshError>>) -> TerminalCommand,
    ) -> Result<(), SshError> {
        self.state.ensure_active()?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| SshError::ChannelInactive)?;
        rx.await.map_err(|_| SshError::ChannelInactive)?
    }

    /// 写入数据到终端
    pub async fn send(&self, data: &[u8]) -> Result<(), SshError> {
        let data = data.to_vec();
        self.call(|reply| TerminalCommand::Send(data, reply)).await
    }

    /// 调整终端大小
    pub async fn set_size(&self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.call(|reply| TerminalCommand::Resize { cols, rows, reply })
            .await
    }

    /// 读取终端输出，None 表示通道已关闭或输出已交给回调
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match self.output.as_mut() {
            Some(output) => output.recv().await,
            None => None,
        }
    }

    /// 注册输出回调，终端输出在后台任务中逐段回调
    pub fn on_received<F>(&mut self, mut callback: F) -> Result<JoinHandle<()>, SshError>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        let mut output = self
            .output
            .take()
            .ok_or_else(|| SshError::Channel("Terminal output already subscribed".to_string()))?;

        Ok(tokio::spawn(async move {
            while let Some(data) = output.recv().await {
                callback(data);
            }
        }))
    }

    /// 关闭终端
    pub async fn close(&self) -> Result<(), SshError> {
        if !self.state.is_active() {
            return Ok(());
        }
        self.call(TerminalCommand::Close).await
    }
}

async fn run_terminal_loop<T: ChannelTransport>(
    id: u64,
    mut transport: T,
    mut commands: mpsc::UnboundedReceiver<TerminalCommand>,
    output: mpsc::UnboundedSender<Vec<u8>>,
    state: ChannelStateCell,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("[PTY] [{}] Connection closed", id);
                break;
            }
            command = commands.recv() => match command {
                Some(TerminalCommand::Send(data, reply)) => {
                    let result = transport.send(&data).await;
                    let failed = result.is_err();
                    let _ = reply.send(result);
                    if failed {
                        warn!("[PTY] [{}] Write failed, closing terminal", id);
                        break;
                    }
                }
                Some(TerminalCommand::Resize { cols, rows, reply }) => {
                    let _ = reply.send(transport.window_change(cols, rows).await);
                }
                Some(TerminalCommand::Close(reply)) => {
                    state.deactivate();
                    let _ = reply.send(transport.close().await);
                    break;
                }
                None => {
                    // 句柄已释放
                    let _ = transport.close().await;
                    break;
                }
            },
            event = transport.recv() => match event {
                Some(ChannelEvent::Data(data)) | Some(ChannelEvent::ExtendedData { data, .. }) => {
                    let _ = output.send(data);
                }
                Some(ChannelEvent::ExitStatus(code)) => {
                    debug!("[PTY] [{}] Remote shell exited with {}", id, code);
                }
                Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                    debug!("[PTY] [{}] Remote closed terminal", id);
                    break;
                }
            }
        }
    }
    state.deactivate();
}

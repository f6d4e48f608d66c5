// Shell 命令通道
//
// 在交互式 Shell 通道上执行命令：命令后追加 `echo <TOKEN>` 和 `echo <TOKEN> >&2`，
// 标准输出与标准错误都以哨兵行结尾时视为该命令执行完毕。
// 两路输出由服务端分别转发，先到的哨兵不能代表另一路已经结束。

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::channel::{
    ChannelEvent, ChannelStateCell, ChannelTransport, RusshTransport, EXTENDED_DATA_STDERR,
};
use super::error::SshError;
use crate::constants::SHELL_SENTINEL_TOKEN;

/// 命令输出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
    /// 退出码（仅 exec 通道可用）
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// 检查命令是否成功（无退出码时视为成功）
    pub fn is_success(&self) -> bool {
        self.exit_code.map_or(true, |code| code == 0)
    }
}

/// 单条命令的分帧处理器，每条命令创建一个，完成后丢弃
struct SentinelFrame<'a> {
    token: &'a str,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// 缓冲区末尾哨兵行的长度（按后缀长度比较）
fn sentinel_suffix_len(buf: &[u8], token: &str) -> Option<usize> {
    let token = token.as_bytes();
    [&b"\n"[..], &b"\r\n"[..]].iter().find_map(|newline| {
        let len = token.len() + newline.len();
        if buf.len() < len {
            return None;
        }
        let tail = &buf[buf.len() - len..];
        (tail.starts_with(token) && tail.ends_with(newline)).then_some(len)
    })
}

fn strip_sentinel(buf: &mut Vec<u8>, token: &str) {
    if let Some(len) = sentinel_suffix_len(buf, token) {
        buf.truncate(buf.len() - len);
    }
}

impl<'a> SentinelFrame<'a> {
    fn new(token: &'a str) -> Self {
        Self {
            token,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// 生成实际写入通道的命令行
    fn frame_command(&self, command: &str) -> String {
        let command = command.trim_end_matches(|c: char| c.is_whitespace() || c == ';');
        let sentinel = format!("echo {token}; echo {token} >&2", token = self.token);
        if command.is_empty() {
            format!("{}\n", sentinel)
        } else if command.ends_with('&') {
            // `cmd &; echo` 是语法错误，后台命令与哨兵分行
            format!("{}\n{}\n", command, sentinel)
        } else {
            format!("{}; {}\n", command, sentinel)
        }
    }

    /// 追加标准输出，返回命令是否已完成
    fn push_stdout(&mut self, data: &[u8]) -> bool {
        self.stdout.extend_from_slice(data);
        self.is_complete()
    }

    /// 追加标准错误，返回命令是否已完成
    fn push_stderr(&mut self, data: &[u8]) -> bool {
        self.stderr.extend_from_slice(data);
        self.is_complete()
    }

    fn is_complete(&self) -> bool {
        sentinel_suffix_len(&self.stdout, self.token).is_some()
            && sentinel_suffix_len(&self.stderr, self.token).is_some()
    }

    fn finish(mut self) -> CommandOutput {
        strip_sentinel(&mut self.stdout, self.token);
        strip_sentinel(&mut self.stderr, self.token);
        CommandOutput {
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: None,
        }
    }
}

/// 交互式 Shell 通道
/// 同一时刻只允许一条命令在执行（`execute` 需要 `&mut self`）
pub struct ShellChannel<T: ChannelTransport = RusshTransport> {
    id: u64,
    transport: T,
    state: ChannelStateCell,
    cancel: CancellationToken,
    token: String,
}

impl<T: ChannelTransport> ShellChannel<T> {
    pub(crate) fn new(
        id: u64,
        transport: T,
        state: ChannelStateCell,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            transport,
            state,
            cancel,
            token: SHELL_SENTINEL_TOKEN.to_string(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active() && !self.cancel.is_cancelled()
    }

    fn fail_inactive(&self) -> SshError {
        self.state.deactivate();
        SshError::ChannelInactive
    }

    /// 执行命令并返回 stdout / stderr
    pub async fn execute(&mut self, command: &str) -> Result<CommandOutput, SshError> {
        if self.cancel.is_cancelled() {
            return Err(self.fail_inactive());
        }
        self.state.ensure_active()?;

        let mut frame = SentinelFrame::new(&self.token);
        let line = frame.frame_command(command);
        debug!("[Shell] [{}] Executing: {}", self.id, command.trim_end());

        if let Err(e) = self.transport.send(line.as_bytes()).await {
            warn!("[Shell] [{}] Failed to write command: {}", self.id, e);
            self.state.deactivate();
            return Err(SshError::ChannelInactive);
        }

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => None,
                event = self.transport.recv() => event,
            };

            match event {
                Some(ChannelEvent::Data(data)) => {
                    if frame.push_stdout(&data) {
                        break;
                    }
                }
                Some(ChannelEvent::ExtendedData { ext, data }) => {
                    if ext == EXTENDED_DATA_STDERR && frame.push_stderr(&data) {
                        break;
                    }
                }
                Some(ChannelEvent::ExitStatus(code)) => {
                    debug!("[Shell] [{}] Shell exited with status {}", self.id, code);
                }
                Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                    warn!(
                        "[Shell] [{}] Channel closed before command completed",
                        self.id
                    );
                    self.state.deactivate();
                    return Err(SshError::ChannelInactive);
                }
            }
        }

        let output = frame.finish();
        debug!(
            "[Shell] [{}] Command finished: {} bytes stdout, {} bytes stderr",
            self.id,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }

    /// 关闭通道
    pub async fn close(&mut self) -> Result<(), SshError> {
        if self.state.get() == super::channel::ChannelState::Inactive {
            return Ok(());
        }
        self.state.deactivate();
        self.transport.close().await
    }
}

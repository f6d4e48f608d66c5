// SFTP 客户端
//
// 后台任务独占底层通道、编解码器和在途请求表；
// 客户端句柄可以克隆，多个请求可同时在途，响应按 id 回到各自的调用方。

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::attrs::FileAttributes;
use super::codec::{Message, SftpCodec};
use super::correlator::{Correlator, Expect, Reply, ReplySender};
use super::error::SftpError;
use super::handle::{HandleKind, RemoteFile};
use super::protocol::{OpenFlags, SFTP_VERSION};
use super::types::{FileEntry, ListingPage};
use crate::constants::{DEFAULT_REQUEST_TIMEOUT_SECS, SFTP_READ_CHUNK, SFTP_WRITE_CHUNK};
use crate::ssh::channel::{ChannelEvent, ChannelStateCell, ChannelTransport};

/// 客户端选项
#[derive(Debug, Clone)]
pub struct SftpOptions {
    /// 单个请求的超时时间，None 表示不限时
    pub request_timeout: Option<Duration>,
}

impl Default for SftpOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        }
    }
}

/// READ 的结果，`eof` 为 true 时 `data` 为空
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    pub data: Bytes,
    pub eof: bool,
}

type BuildMessage = Box<dyn FnOnce(u32) -> Message + Send>;

enum Command {
    /// 由后台任务分配 id 后构造消息
    Request {
        build: BuildMessage,
        expect: Expect,
        reply: ReplySender,
    },
    Shutdown(oneshot::Sender<Result<(), SftpError>>),
}

/// SFTP 客户端
#[derive(Clone)]
pub struct SftpClient {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    state: ChannelStateCell,
    version: u32,
    extensions: Vec<(String, String)>,
}

/// 协商版本并启动后台任务
pub(crate) async fn start<T: ChannelTransport>(
    id: u64,
    mut transport: T,
    options: SftpOptions,
    state: ChannelStateCell,
    cancel: CancellationToken,
) -> Result<SftpClient, SftpError> {
    let mut codec = SftpCodec::new();
    let mut inbound = BytesMut::new();

    let negotiated = tokio::select! {
        _ = cancel.cancelled() => Err(SftpError::ChannelInactive),
        result = negotiate(&mut transport, &mut codec, &mut inbound) => result,
    };
    let (version, extensions) = match negotiated {
        Ok(negotiated) => negotiated,
        Err(e) => {
            warn!("[SFTP] [{}] Version negotiation failed: {}", id, e);
            state.deactivate();
            let _ = transport.close().await;
            return Err(e);
        }
    };

    info!("[SFTP] [{}] Negotiated protocol version {}", id, version);
    if !extensions.is_empty() {
        debug!("[SFTP] [{}] Server extensions: {:?}", id, extensions);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let actor = SftpActor {
        id,
        transport,
        codec,
        inbound,
        correlator: Correlator::new(),
        timer_tx,
        request_timeout: options.request_timeout,
        state: state.clone(),
        cancel,
    };
    state.activate();
    tokio::spawn(actor.run(cmd_rx, timer_rx));

    Ok(SftpClient {
        id,
        commands: cmd_tx,
        state,
        version,
        extensions,
    })
}

async fn negotiate<T: ChannelTransport>(
    transport: &mut T,
    codec: &mut SftpCodec,
    inbound: &mut BytesMut,
) -> Result<(u32, Vec<(String, String)>), SftpError> {
    let init = Message::Init {
        version: SFTP_VERSION,
        extensions: vec![],
    }
    .to_bytes()?;
    transport.send(&init).await?;

    loop {
        if let Some(message) = codec.decode(inbound)? {
            return match message {
                Message::Version {
                    version,
                    extensions,
                } if version <= SFTP_VERSION => Ok((version, extensions)),
                Message::Version { version, .. } => Err(SftpError::UnsupportedVersion {
                    server: version,
                    client: SFTP_VERSION,
                }),
                other => Err(SftpError::protocol(format!(
                    "Expected VERSION, got {:?}",
                    other.message_type()
                ))),
            };
        }

        match transport.recv().await {
            Some(ChannelEvent::Data(data)) => inbound.extend_from_slice(&data),
            Some(ChannelEvent::ExtendedData { data, .. }) => {
                debug!("[SFTP] stderr: {}", String::from_utf8_lossy(&data).trim_end());
            }
            Some(ChannelEvent::ExitStatus(code)) => {
                debug!("[SFTP] Subsystem exited with {}", code);
            }
            Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                return Err(SftpError::ChannelInactive);
            }
        }
    }
}

struct SftpActor<T> {
    id: u64,
    transport: T,
    codec: SftpCodec,
    inbound: BytesMut,
    correlator: Correlator,
    timer_tx: mpsc::UnboundedSender<(u32, u64)>,
    request_timeout: Option<Duration>,
    state: ChannelStateCell,
    cancel: CancellationToken,
}

impl<T: ChannelTransport> SftpActor<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut timers: mpsc::UnboundedReceiver<(u32, u64)>,
    ) {
        let reason = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break "connection closed",
                command = commands.recv() => match command {
                    Some(Command::Request { build, expect, reply }) => {
                        if let Err(e) = self.dispatch(build, expect, reply).await {
                            warn!("[SFTP] [{}] Write failed: {}", self.id, e);
                            break "write failed";
                        }
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.state.deactivate();
                        self.correlator.fail_all(|| SftpError::ChannelInactive);
                        let _ = reply.send(self.transport.close().await.map_err(SftpError::from));
                        break "closed by client";
                    }
                    None => {
                        let _ = self.transport.close().await;
                        break "client dropped";
                    }
                },
                Some((id, generation)) = timers.recv() => {
                    let after = self.request_timeout.unwrap_or_default();
                    self.correlator.expire(id, generation, after);
                }
                event = self.transport.recv() => match event {
                    Some(ChannelEvent::Data(data)) => {
                        if let Err(e) = self.on_data(&data) {
                            error!("[SFTP] [{}] Undecodable reply: {}", self.id, e);
                            let text = e.to_string();
                            self.correlator.fail_all(|| SftpError::Protocol(text.clone()));
                            let _ = self.transport.close().await;
                            break "protocol error";
                        }
                    }
                    Some(ChannelEvent::ExtendedData { data, .. }) => {
                        debug!(
                            "[SFTP] [{}] stderr: {}",
                            self.id,
                            String::from_utf8_lossy(&data).trim_end()
                        );
                    }
                    Some(ChannelEvent::ExitStatus(code)) => {
                        debug!("[SFTP] [{}] Subsystem exited with {}", self.id, code);
                    }
                    Some(ChannelEvent::Eof) | Some(ChannelEvent::Closed) | None => {
                        break "channel closed by remote";
                    }
                },
            }
        };

        self.state.deactivate();
        self.correlator.fail_all(|| SftpError::ChannelInactive);
        debug!("[SFTP] [{}] Session ended: {}", self.id, reason);
    }

    async fn dispatch(
        &mut self,
        build: BuildMessage,
        expect: Expect,
        reply: ReplySender,
    ) -> Result<(), SftpError> {
        let id = self.correlator.next_id();
        let message = build(id);
        let kind = message.message_type();

        let mut frame = BytesMut::new();
        if let Err(e) = message.encode(&mut frame) {
            let _ = reply.send(Err(e));
            return Ok(());
        }

        // 先登记再发送，定时器从登记时开始计时
        let generation = self.correlator.register(id, expect, reply);
        if let Some(timeout) = self.request_timeout {
            let timer_tx = self.timer_tx.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = timer_tx.send((id, generation));
            });
            self.correlator.attach_timer(id, timer.abort_handle());
        }

        debug!("[SFTP] [{}] -> {:?} #{}", self.id, kind, id);
        if let Err(e) = self.transport.send(&frame).await {
            self.correlator.fail(id, SftpError::ChannelInactive);
            return Err(e.into());
        }
        Ok(())
    }

    fn on_data(&mut self, data: &[u8]) -> Result<(), SftpError> {
        self.inbound.extend_from_slice(data);
        while let Some(message) = self.codec.decode(&mut self.inbound)? {
            self.correlator.resolve(message);
        }
        Ok(())
    }
}

fn unexpected(reply: Reply) -> SftpError {
    SftpError::protocol(format!("Unexpected reply: {:?}", reply))
}

impl SftpClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 协商得到的协议版本
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn extensions(&self) -> &[(String, String)] {
        &self.extensions
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    async fn request(
        &self,
        expect: Expect,
        build: impl FnOnce(u32) -> Message + Send + 'static,
    ) -> Result<Reply, SftpError> {
        self.state.ensure_active()?;
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Request {
                build: Box::new(build),
                expect,
                reply: tx,
            })
            .map_err(|_| SftpError::ChannelInactive)?;
        rx.await.map_err(|_| SftpError::ChannelInactive)?
    }

    async fn expect_ok(
        &self,
        build: impl FnOnce(u32) -> Message + Send + 'static,
    ) -> Result<(), SftpError> {
        match self.request(Expect::Status, build).await? {
            Reply::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_attrs(
        &self,
        build: impl FnOnce(u32) -> Message + Send + 'static,
    ) -> Result<FileAttributes, SftpError> {
        match self.request(Expect::Attrs, build).await? {
            Reply::Attrs(attrs) => Ok(attrs),
            other => Err(unexpected(other)),
        }
    }

    /// 打开文件
    pub async fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> Result<RemoteFile, SftpError> {
        let filename = path.to_string();
        let reply = self
            .request(Expect::Handle, move |id| Message::Open {
                id,
                filename,
                flags,
                attrs,
            })
            .await?;
        match reply {
            Reply::Handle(handle) => Ok(RemoteFile::new(path, handle, HandleKind::File)),
            other => Err(unexpected(other)),
        }
    }

    /// 打开目录
    pub async fn open_dir(&self, path: &str) -> Result<RemoteFile, SftpError> {
        let dir = path.to_string();
        let reply = self
            .request(Expect::Handle, move |id| Message::Opendir { id, path: dir })
            .await?;
        match reply {
            Reply::Handle(handle) => Ok(RemoteFile::new(path, handle, HandleKind::Directory)),
            other => Err(unexpected(other)),
        }
    }

    /// 从 offset 读取最多 len 字节
    pub async fn read(
        &self,
        file: &RemoteFile,
        offset: u64,
        len: u32,
    ) -> Result<DataChunk, SftpError> {
        let handle = file.handle().ok_or(SftpError::ClosedHandle)?.to_vec();
        let reply = self
            .request(Expect::Data, move |id| Message::Read {
                id,
                handle,
                offset,
                len,
            })
            .await?;
        match reply {
            Reply::Data { data, eof } => Ok(DataChunk { data, eof }),
            other => Err(unexpected(other)),
        }
    }

    /// 在 offset 处写入数据
    pub async fn write(
        &self,
        file: &RemoteFile,
        offset: u64,
        data: impl Into<Bytes>,
    ) -> Result<(), SftpError> {
        let handle = file.handle().ok_or(SftpError::ClosedHandle)?.to_vec();
        let data = data.into();
        self.expect_ok(move |id| Message::Write {
            id,
            handle,
            offset,
            data,
        })
        .await
    }

    /// 关闭句柄，重复关闭返回 `ClosedHandle` 且不发送请求
    pub async fn close(&self, file: &mut RemoteFile) -> Result<(), SftpError> {
        let handle = file.take_handle().ok_or(SftpError::ClosedHandle)?;
        self.expect_ok(move |id| Message::Close { id, handle }).await
    }

    /// 已打开文件的属性
    pub async fn fstat(&self, file: &RemoteFile) -> Result<FileAttributes, SftpError> {
        let handle = file.handle().ok_or(SftpError::ClosedHandle)?.to_vec();
        self.expect_attrs(move |id| Message::Fstat { id, handle })
            .await
    }

    /// 路径属性（跟随符号链接）
    pub async fn stat(&self, path: &str) -> Result<FileAttributes, SftpError> {
        let path = path.to_string();
        self.expect_attrs(move |id| Message::Stat { id, path }).await
    }

    pub async fn mkdir(&self, path: &str, attrs: FileAttributes) -> Result<(), SftpError> {
        let path = path.to_string();
        self.expect_ok(move |id| Message::Mkdir { id, path, attrs })
            .await
    }

    pub async fn remove(&self, path: &str) -> Result<(), SftpError> {
        let filename = path.to_string();
        self.expect_ok(move |id| Message::Remove { id, filename })
            .await
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), SftpError> {
        let path = path.to_string();
        self.expect_ok(move |id| Message::Rmdir { id, path }).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let from = from.to_string();
        let to = to.to_string();
        self.expect_ok(move |id| Message::Rename { id, from, to })
            .await
    }

    /// 规范化路径
    pub async fn realpath(&self, path: &str) -> Result<String, SftpError> {
        let path = path.to_string();
        let reply = self
            .request(Expect::Name, move |id| Message::Realpath { id, path })
            .await?;
        match reply {
            Reply::Name(entries) => entries
                .into_iter()
                .next()
                .map(|entry| entry.filename)
                .ok_or_else(|| SftpError::protocol("Empty REALPATH reply")),
            other => Err(unexpected(other)),
        }
    }

    /// 用户主目录
    pub async fn home_dir(&self) -> Result<String, SftpError> {
        self.realpath(".").await
    }

    /// 读取目录的第一页
    pub async fn read_dir(&self, dir: &RemoteFile) -> Result<ListingPage, SftpError> {
        let handle = dir.handle().ok_or(SftpError::ClosedHandle)?.to_vec();
        self.read_dir_page(handle).await
    }

    /// 按续读句柄读取下一页，已结束的列表直接返回结束页
    pub async fn next_page(&self, page: &ListingPage) -> Result<ListingPage, SftpError> {
        match &page.continuation {
            Some(handle) => self.read_dir_page(handle.clone()).await,
            None => Ok(ListingPage::end()),
        }
    }

    async fn read_dir_page(&self, handle: Vec<u8>) -> Result<ListingPage, SftpError> {
        let request_handle = handle.clone();
        let reply = self
            .request(Expect::Name, move |id| Message::Readdir {
                id,
                handle: request_handle,
            })
            .await?;
        match reply {
            Reply::Name(entries) => Ok(ListingPage {
                entries,
                continuation: Some(handle),
            }),
            Reply::EndOfListing => Ok(ListingPage::end()),
            other => Err(unexpected(other)),
        }
    }

    /// 列出目录全部条目（不含 `.` 与 `..`）
    pub async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        let mut dir = self.open_dir(path).await?;
        let result = self.collect_listing(&dir).await;
        if let Err(e) = self.close(&mut dir).await {
            warn!("[SFTP] [{}] Failed to close directory {}: {}", self.id, path, e);
        }
        result
    }

    async fn collect_listing(&self, dir: &RemoteFile) -> Result<Vec<FileEntry>, SftpError> {
        let mut entries = Vec::new();
        let mut page = self.read_dir(dir).await?;
        loop {
            entries.extend(
                std::mem::take(&mut page.entries)
                    .into_iter()
                    .filter(|entry| !entry.is_dot_entry()),
            );
            if !page.has_more() {
                break;
            }
            page = self.next_page(&page).await?;
        }
        Ok(entries)
    }

    /// 下载整个文件
    /// 读取完成后关闭句柄，关闭失败只记录警告
    pub async fn get(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        let mut file = self.open(path, OpenFlags::READ, FileAttributes::default()).await?;
        let result = self.read_to_end(&file).await;
        if let Err(e) = self.close(&mut file).await {
            warn!("[SFTP] [{}] Failed to close {}: {}", self.id, path, e);
        }
        if let Ok(content) = &result {
            debug!("[SFTP] [{}] Downloaded {} ({} bytes)", self.id, path, content.len());
        }
        result
    }

    async fn read_to_end(&self, file: &RemoteFile) -> Result<Vec<u8>, SftpError> {
        let mut content = Vec::new();
        loop {
            let chunk = self
                .read(file, content.len() as u64, SFTP_READ_CHUNK)
                .await?;
            // 空数据视同 EOF，避免服务器异常时死循环
            if chunk.eof || chunk.data.is_empty() {
                break;
            }
            content.extend_from_slice(&chunk.data);
        }
        Ok(content)
    }

    /// 写入整个文件（创建或截断）
    pub async fn write_file(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        let flags = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        let mut file = self.open(path, flags, FileAttributes::default()).await?;

        let mut result = Ok(());
        for (index, chunk) in data.chunks(SFTP_WRITE_CHUNK).enumerate() {
            let offset = (index * SFTP_WRITE_CHUNK) as u64;
            if let Err(e) = self.write(&file, offset, Bytes::copy_from_slice(chunk)).await {
                result = Err(e);
                break;
            }
        }

        let closed = self.close(&mut file).await;
        result?;
        closed?;
        debug!("[SFTP] [{}] Uploaded {} ({} bytes)", self.id, path, data.len());
        Ok(())
    }

    /// 路径是否存在
    pub async fn exists(&self, path: &str) -> Result<bool, SftpError> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 关闭 SFTP 通道，在途请求以 `ChannelInactive` 失败
    pub async fn shutdown(&self) -> Result<(), SftpError> {
        if !self.state.is_active() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .map_err(|_| SftpError::ChannelInactive)?;
        rx.await.map_err(|_| SftpError::ChannelInactive)?
    }
}

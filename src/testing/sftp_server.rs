// 内存中的 SFTP 服务器
// 在 MemoryPeer 上应答客户端请求，文件系统状态可在测试中检查

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;

use super::MemoryPeer;
use crate::sftp::attrs::FileAttributes;
use crate::sftp::codec::{Message, SftpCodec};
use crate::sftp::protocol::{MessageType, OpenFlags, StatusCode};
use crate::sftp::types::{get_parent_path, join_path, FileEntry};

const HOME: &str = "/home/test";
const FIXED_TIME: u32 = 1_700_000_000;

enum OpenHandle {
    File(String),
    Dir { path: String, cursor: usize },
}

/// 服务器端文件系统
#[derive(Default)]
pub(crate) struct FakeFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub denied: BTreeSet<String>,
    /// 收到的请求类型（按顺序）
    pub requests: Vec<MessageType>,
    handles: HashMap<Vec<u8>, OpenHandle>,
    next_handle: u32,
}

pub(crate) struct FakeSftpServer {
    fs: Arc<Mutex<FakeFs>>,
    version: u32,
    page_size: usize,
    reply_chunk: Option<usize>,
}

impl FakeSftpServer {
    pub fn new() -> Self {
        let mut fs = FakeFs::default();
        for dir in ["/", "/home", HOME, "/tmp"] {
            fs.dirs.insert(dir.to_string());
        }
        Self {
            fs: Arc::new(Mutex::new(fs)),
            version: 3,
            page_size: 100,
            reply_chunk: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// 每次 READDIR 返回的条目数
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// 把每个响应拆成固定大小的数据块发送
    pub fn with_reply_chunk(mut self, size: usize) -> Self {
        self.reply_chunk = Some(size.max(1));
        self
    }

    pub fn with_dir(self, path: &str) -> Self {
        self.fs.lock().unwrap().add_dir(path);
        self
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        {
            let mut fs = self.fs.lock().unwrap();
            fs.add_dir(&get_parent_path(path));
            fs.files.insert(path.to_string(), content.to_vec());
        }
        self
    }

    pub fn deny(self, path: &str) -> Self {
        self.fs.lock().unwrap().denied.insert(path.to_string());
        self
    }

    pub fn fs(&self) -> Arc<Mutex<FakeFs>> {
        self.fs.clone()
    }

    pub fn spawn(self, peer: MemoryPeer) -> JoinHandle<()> {
        tokio::spawn(self.run(peer))
    }

    async fn run(self, mut peer: MemoryPeer) {
        let mut codec = SftpCodec::new();
        let mut buf = BytesMut::new();

        while let Some(chunk) = peer.outbound.recv().await {
            buf.extend_from_slice(&chunk);
            while let Ok(Some(request)) = codec.decode(&mut buf) {
                let reply = {
                    let mut fs = self.fs.lock().unwrap();
                    fs.requests.push(request.message_type());
                    fs.handle(request, self.version, self.page_size)
                };
                let bytes = reply.to_bytes().unwrap();
                match self.reply_chunk {
                    Some(size) => {
                        for piece in bytes.chunks(size) {
                            peer.send_data(piece.to_vec());
                        }
                    }
                    None => peer.send_data(bytes.to_vec()),
                }
            }
        }
    }
}

fn status(id: u32, code: StatusCode, message: &str) -> Message {
    Message::status(id, code, message)
}

impl FakeFs {
    fn add_dir(&mut self, path: &str) {
        let mut current = path.to_string();
        while current != "/" {
            self.dirs.insert(current.clone());
            current = get_parent_path(&current);
        }
        self.dirs.insert("/".to_string());
    }

    fn open_handle(&mut self, handle: OpenHandle) -> Vec<u8> {
        self.next_handle += 1;
        let bytes = format!("h{}", self.next_handle).into_bytes();
        self.handles.insert(bytes.clone(), handle);
        bytes
    }

    fn attrs_of(&self, path: &str) -> Option<FileAttributes> {
        if let Some(content) = self.files.get(path) {
            return Some(
                FileAttributes::default()
                    .with_size(content.len() as u64)
                    .with_permissions(0o100644)
                    .with_times(FIXED_TIME, FIXED_TIME),
            );
        }
        self.dirs.contains(path).then(|| {
            FileAttributes::default()
                .with_size(4096)
                .with_permissions(0o040755)
                .with_times(FIXED_TIME, FIXED_TIME)
        })
    }

    fn children(&self, dir: &str) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self
            .dirs
            .iter()
            .chain(self.files.keys())
            .filter(|path| path.as_str() != dir && get_parent_path(path) == dir)
            .filter_map(|path| {
                let attrs = self.attrs_of(path)?;
                let name = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
                let kind = if self.dirs.contains(path) { 'd' } else { '-' };
                let longname = format!(
                    "{}rw-r--r-- 1 test test {} Nov 14 2023 {}",
                    kind,
                    attrs.size.unwrap_or(0),
                    name
                );
                Some(FileEntry::new(name, longname, attrs))
            })
            .collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        entries
    }

    fn resolve(path: &str) -> String {
        if path.is_empty() || path == "." {
            HOME.to_string()
        } else if path.starts_with('/') {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        } else {
            join_path(HOME, path)
        }
    }

    fn handle(&mut self, request: Message, version: u32, page_size: usize) -> Message {
        match request {
            Message::Init { .. } => Message::Version {
                version,
                extensions: vec![],
            },
            Message::Open {
                id,
                filename,
                flags,
                ..
            } => {
                if self.denied.contains(&filename) {
                    return status(id, StatusCode::PermissionDenied, "Permission denied");
                }
                if flags.contains(OpenFlags::WRITE) {
                    if !self.dirs.contains(&get_parent_path(&filename)) {
                        return status(id, StatusCode::NoSuchFile, "No such file");
                    }
                    let content = self.files.entry(filename.clone()).or_default();
                    if flags.contains(OpenFlags::TRUNCATE) {
                        content.clear();
                    }
                } else if !self.files.contains_key(&filename) {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                }
                let handle = self.open_handle(OpenHandle::File(filename));
                Message::Handle { id, handle }
            }
            Message::Opendir { id, path } => {
                if self.denied.contains(&path) {
                    return status(id, StatusCode::PermissionDenied, "Permission denied");
                }
                if !self.dirs.contains(&path) {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                }
                let handle = self.open_handle(OpenHandle::Dir { path, cursor: 0 });
                Message::Handle { id, handle }
            }
            Message::Close { id, handle } => match self.handles.remove(&handle) {
                Some(_) => status(id, StatusCode::Ok, ""),
                None => status(id, StatusCode::Failure, "Invalid handle"),
            },
            Message::Read {
                id,
                handle,
                offset,
                len,
            } => {
                let Some(OpenHandle::File(path)) = self.handles.get(&handle) else {
                    return status(id, StatusCode::Failure, "Invalid handle");
                };
                let Some(content) = self.files.get(path) else {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                };
                let offset = offset as usize;
                if offset >= content.len() {
                    return status(id, StatusCode::Eof, "End of file");
                }
                let end = (offset + len as usize).min(content.len());
                Message::Data {
                    id,
                    data: Bytes::copy_from_slice(&content[offset..end]),
                }
            }
            Message::Write {
                id,
                handle,
                offset,
                data,
            } => {
                let Some(OpenHandle::File(path)) = self.handles.get(&handle) else {
                    return status(id, StatusCode::Failure, "Invalid handle");
                };
                let Some(content) = self.files.get_mut(path) else {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                };
                let offset = offset as usize;
                if content.len() < offset + data.len() {
                    content.resize(offset + data.len(), 0);
                }
                content[offset..offset + data.len()].copy_from_slice(&data);
                status(id, StatusCode::Ok, "")
            }
            Message::Fstat { id, handle } => {
                let attrs = match self.handles.get(&handle) {
                    Some(OpenHandle::File(path)) | Some(OpenHandle::Dir { path, .. }) => {
                        self.attrs_of(path)
                    }
                    None => None,
                };
                match attrs {
                    Some(attrs) => Message::Attrs { id, attrs },
                    None => status(id, StatusCode::Failure, "Invalid handle"),
                }
            }
            Message::Readdir { id, handle } => {
                let (path, cursor) = match self.handles.get(&handle) {
                    Some(OpenHandle::Dir { path, cursor }) => (path.clone(), *cursor),
                    _ => return status(id, StatusCode::Failure, "Invalid handle"),
                };
                let entries = self.children(&path);
                if cursor >= entries.len() {
                    return status(id, StatusCode::Eof, "End of directory");
                }
                let page: Vec<FileEntry> =
                    entries.into_iter().skip(cursor).take(page_size).collect();
                if let Some(OpenHandle::Dir { cursor: next, .. }) = self.handles.get_mut(&handle) {
                    *next = cursor + page.len();
                }
                Message::Name { id, entries: page }
            }
            Message::Stat { id, path } => {
                if self.denied.contains(&path) {
                    return status(id, StatusCode::PermissionDenied, "Permission denied");
                }
                match self.attrs_of(&path) {
                    Some(attrs) => Message::Attrs { id, attrs },
                    None => status(id, StatusCode::NoSuchFile, "No such file"),
                }
            }
            Message::Mkdir { id, path, .. } => {
                if self.attrs_of(&path).is_some() {
                    return status(id, StatusCode::Failure, "File exists");
                }
                if !self.dirs.contains(&get_parent_path(&path)) {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                }
                self.dirs.insert(path);
                status(id, StatusCode::Ok, "")
            }
            Message::Remove { id, filename } => match self.files.remove(&filename) {
                Some(_) => status(id, StatusCode::Ok, ""),
                None => status(id, StatusCode::NoSuchFile, "No such file"),
            },
            Message::Rmdir { id, path } => {
                if !self.dirs.contains(&path) {
                    return status(id, StatusCode::NoSuchFile, "No such file");
                }
                if !self.children(&path).is_empty() {
                    return status(id, StatusCode::Failure, "Directory not empty");
                }
                self.dirs.remove(&path);
                status(id, StatusCode::Ok, "")
            }
            Message::Realpath { id, path } => Message::Name {
                id,
                entries: vec![FileEntry::new(
                    Self::resolve(&path),
                    "",
                    FileAttributes::default(),
                )],
            },
            Message::Rename { id, from, to } => {
                if let Some(content) = self.files.remove(&from) {
                    self.files.insert(to, content);
                    status(id, StatusCode::Ok, "")
                } else if self.dirs.remove(&from) {
                    self.dirs.insert(to);
                    status(id, StatusCode::Ok, "")
                } else {
                    status(id, StatusCode::NoSuchFile, "No such file")
                }
            }
            other => status(
                other.id().unwrap_or(0),
                StatusCode::OpUnsupported,
                "Operation unsupported",
            ),
        }
    }
}

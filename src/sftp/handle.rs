// 远程文件 / 目录句柄

/// 句柄类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    File,
    Directory,
}

/// 已打开的远程文件或目录
///
/// 句柄只能关闭一次，关闭后再次关闭返回 `ClosedHandle`，不会发出请求。
#[derive(Debug)]
pub struct RemoteFile {
    path: String,
    handle: Option<Vec<u8>>,
    kind: HandleKind,
}

impl RemoteFile {
    pub(crate) fn new(path: impl Into<String>, handle: Vec<u8>, kind: HandleKind) -> Self {
        Self {
            path: path.into(),
            handle: Some(handle),
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// 原始句柄字节
    pub fn handle(&self) -> Option<&[u8]> {
        self.handle.as_deref()
    }

    pub(crate) fn take_handle(&mut self) -> Option<Vec<u8>> {
        self.handle.take()
    }
}

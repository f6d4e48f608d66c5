// SFTP 基础数据类型

use bytes::BytesMut;

use super::attrs::FileAttributes;
use super::error::SftpError;
use super::wire::{put_string, WireReader};

/// 文件条目（NAME 消息中的一项）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// 文件名
    pub filename: String,
    /// ls -l 风格的长名称
    pub longname: String,
    /// 属性
    pub attrs: FileAttributes,
}

impl FileEntry {
    pub fn new(filename: impl Into<String>, longname: impl Into<String>, attrs: FileAttributes) -> Self {
        Self {
            filename: filename.into(),
            longname: longname.into(),
            attrs,
        }
    }

    /// 构造一个目录条目（用作遍历根节点等场景）
    pub fn directory(name: impl Into<String>) -> Self {
        let name = name.into();
        let longname = format!("drwxr-xr-x 1 - - 0 - {}", name);
        Self::new(name, longname, FileAttributes::default().with_permissions(0o040755))
    }

    /// 是否是目录
    /// 以长名称首字符为准；长名称为空时回退到权限位
    pub fn is_directory(&self) -> bool {
        match self.longname.chars().next() {
            Some(kind) => kind == 'd',
            None => self.attrs.is_dir().unwrap_or(false),
        }
    }

    /// 是否是符号链接
    pub fn is_symlink(&self) -> bool {
        match self.longname.chars().next() {
            Some(kind) => kind == 'l',
            None => self.attrs.is_symlink().unwrap_or(false),
        }
    }

    /// 是否是隐藏文件（以 . 开头）
    pub fn is_hidden(&self) -> bool {
        self.filename.starts_with('.')
    }

    /// `.` 或 `..`
    pub fn is_dot_entry(&self) -> bool {
        self.filename == "." || self.filename == ".."
    }

    /// 声明大小
    pub fn size(&self) -> Option<u64> {
        self.attrs.size
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, self.filename.as_bytes());
        put_string(buf, self.longname.as_bytes());
        self.attrs.encode(buf);
    }

    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self, SftpError> {
        let filename = reader.read_string()?;
        let longname = reader.read_string()?;
        let attrs = FileAttributes::decode(reader)?;
        Ok(Self {
            filename,
            longname,
            attrs,
        })
    }
}

/// 目录列表的一页
/// 续读句柄存在即表示还有后续页
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingPage {
    /// 本页条目
    pub entries: Vec<FileEntry>,
    /// 续读句柄
    pub continuation: Option<Vec<u8>>,
}

impl ListingPage {
    /// 列表结束页
    pub fn end() -> Self {
        Self::default()
    }

    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

// ============================================================================
// 路径工具函数
// ============================================================================

/// 获取父目录路径
pub fn get_parent_path(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }

    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => "/".to_string(),
    }
}

/// 连接路径
pub fn join_path(base: &str, name: &str) -> String {
    if base == "/" {
        format!("/{}", name)
    } else if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), name)
    }
}

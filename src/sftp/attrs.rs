// 文件属性（按存在位编码）

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};

use super::error::SftpError;
use super::protocol::attr_flags;
use super::wire::{put_string, WireReader};

/// 文件类型位掩码
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// 文件属性
/// 每个字段只有在对应存在位置位时才出现，None 表示“未知”而不是 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// 文件大小
    pub size: Option<u64>,
    /// (uid, gid)
    pub uid_gid: Option<(u32, u32)>,
    /// 权限位（含文件类型位）
    pub permissions: Option<u32>,
    /// (atime, mtime)
    pub times: Option<(u32, u32)>,
    /// 扩展属性对
    pub extended: Option<Vec<(String, String)>>,
}

impl FileAttributes {
    /// 根据已有字段计算存在位
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= attr_flags::SIZE;
        }
        if self.uid_gid.is_some() {
            flags |= attr_flags::UIDGID;
        }
        if self.permissions.is_some() {
            flags |= attr_flags::PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= attr_flags::ACMODTIME;
        }
        if self.extended.is_some() {
            flags |= attr_flags::EXTENDED;
        }
        flags
    }

    /// 编码后的字节数
    pub fn encoded_len(&self) -> usize {
        let mut len = 4;
        if self.size.is_some() {
            len += 8;
        }
        if self.uid_gid.is_some() {
            len += 8;
        }
        if self.permissions.is_some() {
            len += 4;
        }
        if self.times.is_some() {
            len += 8;
        }
        if let Some(extended) = &self.extended {
            len += 4;
            for (name, value) in extended {
                len += 8 + name.len() + value.len();
            }
        }
        len
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.flags());
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some((uid, gid)) = self.uid_gid {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let Some((atime, mtime)) = self.times {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if let Some(extended) = &self.extended {
            buf.put_u32(extended.len() as u32);
            for (name, value) in extended {
                put_string(buf, name.as_bytes());
                put_string(buf, value.as_bytes());
            }
        }
    }

    /// 按存在位解码，只消费存在字段所需的字节
    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self, SftpError> {
        let flags = reader.read_u32()?;
        let mut attrs = FileAttributes::default();

        if flags & attr_flags::SIZE != 0 {
            attrs.size = Some(reader.read_u64()?);
        }
        if flags & attr_flags::UIDGID != 0 {
            let uid = reader.read_u32()?;
            let gid = reader.read_u32()?;
            attrs.uid_gid = Some((uid, gid));
        }
        if flags & attr_flags::PERMISSIONS != 0 {
            attrs.permissions = Some(reader.read_u32()?);
        }
        if flags & attr_flags::ACMODTIME != 0 {
            let atime = reader.read_u32()?;
            let mtime = reader.read_u32()?;
            attrs.times = Some((atime, mtime));
        }
        if flags & attr_flags::EXTENDED != 0 {
            let count = reader.read_u32()? as usize;
            // 每对至少 8 字节，防止恶意计数导致大量预分配
            let mut extended = Vec::with_capacity(count.min(reader.remaining() / 8));
            for _ in 0..count {
                let name = reader.read_string()?;
                let value = reader.read_string()?;
                extended.push((name, value));
            }
            attrs.extended = Some(extended);
        }

        Ok(attrs)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_times(mut self, atime: u32, mtime: u32) -> Self {
        self.times = Some((atime, mtime));
        self
    }

    pub fn uid(&self) -> Option<u32> {
        self.uid_gid.map(|(uid, _)| uid)
    }

    pub fn gid(&self) -> Option<u32> {
        self.uid_gid.map(|(_, gid)| gid)
    }

    pub fn atime(&self) -> Option<u32> {
        self.times.map(|(atime, _)| atime)
    }

    pub fn mtime(&self) -> Option<u32> {
        self.times.map(|(_, mtime)| mtime)
    }

    /// 最近一次访问或修改时间
    pub fn latest_time(&self) -> Option<u32> {
        self.times.map(|(atime, mtime)| atime.max(mtime))
    }

    /// 修改时间
    pub fn modified(&self) -> Option<SystemTime> {
        self.mtime()
            .map(|mtime| UNIX_EPOCH + Duration::from_secs(mtime as u64))
    }

    /// 根据权限位判断是否为目录，未知时返回 None
    pub fn is_dir(&self) -> Option<bool> {
        self.permissions.map(|p| p & S_IFMT == S_IFDIR)
    }

    /// 根据权限位判断是否为符号链接
    pub fn is_symlink(&self) -> Option<bool> {
        self.permissions.map(|p| p & S_IFMT == S_IFLNK)
    }
}

// SFTP v3 协议常量

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// 客户端支持的协议版本
pub const SFTP_VERSION: u32 = 3;

/// 单条消息长度上限
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Init = 1,
    Version = 2,
    Open = 3,
    Close = 4,
    Read = 5,
    Write = 6,
    Fstat = 8,
    Opendir = 11,
    Readdir = 12,
    Remove = 13,
    Mkdir = 14,
    Rmdir = 15,
    Realpath = 16,
    Stat = 17,
    Rename = 18,
    Status = 101,
    Handle = 102,
    Data = 103,
    Name = 104,
    Attrs = 105,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        let kind = match value {
            1 => Self::Init,
            2 => Self::Version,
            3 => Self::Open,
            4 => Self::Close,
            5 => Self::Read,
            6 => Self::Write,
            8 => Self::Fstat,
            11 => Self::Opendir,
            12 => Self::Readdir,
            13 => Self::Remove,
            14 => Self::Mkdir,
            15 => Self::Rmdir,
            16 => Self::Realpath,
            17 => Self::Stat,
            18 => Self::Rename,
            101 => Self::Status,
            102 => Self::Handle,
            103 => Self::Data,
            104 => Self::Name,
            105 => Self::Attrs,
            _ => return None,
        };
        Some(kind)
    }
}

/// 状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,
    /// 协议未定义的状态码，原样保留
    Other(u32),
}

impl StatusCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Eof,
            2 => Self::NoSuchFile,
            3 => Self::PermissionDenied,
            4 => Self::Failure,
            5 => Self::BadMessage,
            6 => Self::NoConnection,
            7 => Self::ConnectionLost,
            8 => Self::OpUnsupported,
            other => Self::Other(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Eof => 1,
            Self::NoSuchFile => 2,
            Self::PermissionDenied => 3,
            Self::Failure => 4,
            Self::BadMessage => 5,
            Self::NoConnection => 6,
            Self::ConnectionLost => 7,
            Self::OpUnsupported => 8,
            Self::Other(code) => *code,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Eof => "EOF",
            Self::NoSuchFile => "NO_SUCH_FILE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Failure => "FAILURE",
            Self::BadMessage => "BAD_MESSAGE",
            Self::NoConnection => "NO_CONNECTION",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::OpUnsupported => "OP_UNSUPPORTED",
            Self::Other(code) => return write!(f, "STATUS_{}", code),
        };
        f.write_str(name)
    }
}

/// 打开文件标志位，原样写入协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x0000_0001);
    pub const WRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const APPEND: OpenFlags = OpenFlags(0x0000_0004);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0008);
    pub const TRUNCATE: OpenFlags = OpenFlags(0x0000_0010);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0x0000_0020);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

/// 属性存在位
pub mod attr_flags {
    pub const SIZE: u32 = 0x0000_0001;
    pub const UIDGID: u32 = 0x0000_0002;
    pub const PERMISSIONS: u32 = 0x0000_0004;
    pub const ACMODTIME: u32 = 0x0000_0008;
    pub const EXTENDED: u32 = 0x8000_0000;
}

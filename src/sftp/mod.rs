// SFTP v3 客户端
//
// 模块结构:
// - protocol: 消息类型、状态码、打开标志
// - wire / attrs / types: 线格式与数据模型
// - codec: 帧编解码（含 DATA 重组）
// - correlator: 请求 id 与响应关联
// - client: 对外的 SftpClient

pub mod attrs;
pub(crate) mod client;
pub mod codec;
pub(crate) mod correlator;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod types;
pub(crate) mod wire;

// 公开导出
pub use attrs::FileAttributes;
pub use client::{DataChunk, SftpClient, SftpOptions};
pub use codec::{Message, SftpCodec};
pub use error::SftpError;
pub use handle::{HandleKind, RemoteFile};
pub use protocol::{OpenFlags, StatusCode, SFTP_VERSION};
pub use types::{get_parent_path, join_path, FileEntry, ListingPage};

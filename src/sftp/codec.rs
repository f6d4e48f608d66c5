// SFTP 消息编解码
//
// 帧格式: length:u32 | type:u8 | body，length = 1 + len(body)
// DATA 消息在数据不完整时进入重组模式，避免整帧缓冲后再拷贝。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::attrs::FileAttributes;
use super::error::SftpError;
use super::protocol::{MessageType, OpenFlags, StatusCode, MAX_MESSAGE_LEN};
use super::types::FileEntry;
use super::wire::{put_string, WireReader};

/// 帧头长度（length + type）
const HEADER_LEN: usize = 5;
/// DATA 帧头 + request id + 冗余长度字段
const DATA_PRELUDE_LEN: usize = HEADER_LEN + 8;

/// SFTP 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Init {
        version: u32,
        extensions: Vec<(String, String)>,
    },
    Version {
        version: u32,
        extensions: Vec<(String, String)>,
    },
    Open {
        id: u32,
        filename: String,
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    Close {
        id: u32,
        handle: Vec<u8>,
    },
    Read {
        id: u32,
        handle: Vec<u8>,
        offset: u64,
        len: u32,
    },
    Write {
        id: u32,
        handle: Vec<u8>,
        offset: u64,
        data: Bytes,
    },
    Fstat {
        id: u32,
        handle: Vec<u8>,
    },
    Opendir {
        id: u32,
        path: String,
    },
    Readdir {
        id: u32,
        handle: Vec<u8>,
    },
    Remove {
        id: u32,
        filename: String,
    },
    Mkdir {
        id: u32,
        path: String,
        attrs: FileAttributes,
    },
    Rmdir {
        id: u32,
        path: String,
    },
    Realpath {
        id: u32,
        path: String,
    },
    Stat {
        id: u32,
        path: String,
    },
    Rename {
        id: u32,
        from: String,
        to: String,
    },
    Status {
        id: u32,
        code: StatusCode,
        message: String,
        language: String,
    },
    Handle {
        id: u32,
        handle: Vec<u8>,
    },
    Data {
        id: u32,
        data: Bytes,
    },
    Name {
        id: u32,
        entries: Vec<FileEntry>,
    },
    Attrs {
        id: u32,
        attrs: FileAttributes,
    },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Init { .. } => MessageType::Init,
            Message::Version { .. } => MessageType::Version,
            Message::Open { .. } => MessageType::Open,
            Message::Close { .. } => MessageType::Close,
            Message::Read { .. } => MessageType::Read,
            Message::Write { .. } => MessageType::Write,
            Message::Fstat { .. } => MessageType::Fstat,
            Message::Opendir { .. } => MessageType::Opendir,
            Message::Readdir { .. } => MessageType::Readdir,
            Message::Remove { .. } => MessageType::Remove,
            Message::Mkdir { .. } => MessageType::Mkdir,
            Message::Rmdir { .. } => MessageType::Rmdir,
            Message::Realpath { .. } => MessageType::Realpath,
            Message::Stat { .. } => MessageType::Stat,
            Message::Rename { .. } => MessageType::Rename,
            Message::Status { .. } => MessageType::Status,
            Message::Handle { .. } => MessageType::Handle,
            Message::Data { .. } => MessageType::Data,
            Message::Name { .. } => MessageType::Name,
            Message::Attrs { .. } => MessageType::Attrs,
        }
    }

    /// 请求 id，INIT / VERSION 没有 id
    pub fn id(&self) -> Option<u32> {
        match self {
            Message::Init { .. } | Message::Version { .. } => None,
            Message::Open { id, .. }
            | Message::Close { id, .. }
            | Message::Read { id, .. }
            | Message::Write { id, .. }
            | Message::Fstat { id, .. }
            | Message::Opendir { id, .. }
            | Message::Readdir { id, .. }
            | Message::Remove { id, .. }
            | Message::Mkdir { id, .. }
            | Message::Rmdir { id, .. }
            | Message::Realpath { id, .. }
            | Message::Stat { id, .. }
            | Message::Rename { id, .. }
            | Message::Status { id, .. }
            | Message::Handle { id, .. }
            | Message::Data { id, .. }
            | Message::Name { id, .. }
            | Message::Attrs { id, .. } => Some(*id),
        }
    }

    /// 构造状态消息
    pub fn status(id: u32, code: StatusCode, message: impl Into<String>) -> Self {
        Message::Status {
            id,
            code,
            message: message.into(),
            language: String::new(),
        }
    }

    /// 编码为完整帧追加到 dst
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), SftpError> {
        let start = dst.len();
        dst.put_u32(0);
        dst.put_u8(self.message_type() as u8);

        match self {
            Message::Init {
                version,
                extensions,
            }
            | Message::Version {
                version,
                extensions,
            } => {
                dst.put_u32(*version);
                for (name, data) in extensions {
                    put_string(dst, name.as_bytes());
                    put_string(dst, data.as_bytes());
                }
            }
            Message::Open {
                id,
                filename,
                flags,
                attrs,
            } => {
                dst.put_u32(*id);
                put_string(dst, filename.as_bytes());
                dst.put_u32(flags.bits());
                attrs.encode(dst);
            }
            Message::Close { id, handle }
            | Message::Fstat { id, handle }
            | Message::Readdir { id, handle }
            | Message::Handle { id, handle } => {
                dst.put_u32(*id);
                put_string(dst, handle);
            }
            Message::Read {
                id,
                handle,
                offset,
                len,
            } => {
                dst.put_u32(*id);
                put_string(dst, handle);
                dst.put_u64(*offset);
                dst.put_u32(*len);
            }
            Message::Write {
                id,
                handle,
                offset,
                data,
            } => {
                dst.put_u32(*id);
                put_string(dst, handle);
                dst.put_u64(*offset);
                put_string(dst, data);
            }
            Message::Opendir { id, path }
            | Message::Rmdir { id, path }
            | Message::Realpath { id, path }
            | Message::Stat { id, path }
            | Message::Remove { id, filename: path } => {
                dst.put_u32(*id);
                put_string(dst, path.as_bytes());
            }
            Message::Mkdir { id, path, attrs } => {
                dst.put_u32(*id);
                put_string(dst, path.as_bytes());
                attrs.encode(dst);
            }
            Message::Rename { id, from, to } => {
                dst.put_u32(*id);
                put_string(dst, from.as_bytes());
                put_string(dst, to.as_bytes());
            }
            Message::Status {
                id,
                code,
                message,
                language,
            } => {
                dst.put_u32(*id);
                dst.put_u32(code.as_u32());
                put_string(dst, message.as_bytes());
                put_string(dst, language.as_bytes());
            }
            Message::Data { id, data } => {
                dst.put_u32(*id);
                put_string(dst, data);
            }
            Message::Name { id, entries } => {
                dst.put_u32(*id);
                dst.put_u32(entries.len() as u32);
                for entry in entries {
                    entry.encode(dst);
                }
            }
            Message::Attrs { id, attrs } => {
                dst.put_u32(*id);
                attrs.encode(dst);
            }
        }

        let length = dst.len() - start - 4;
        if length > MAX_MESSAGE_LEN {
            dst.truncate(start);
            return Err(SftpError::protocol(format!(
                "Message too large: {} bytes",
                length
            )));
        }
        dst[start..start + 4].copy_from_slice(&(length as u32).to_be_bytes());
        Ok(())
    }

    /// 编码为独立的字节缓冲
    pub fn to_bytes(&self) -> Result<BytesMut, SftpError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// 解码帧体（不含 length 与 type）
fn decode_body(kind: MessageType, body: &[u8]) -> Result<Message, SftpError> {
    let mut r = WireReader::new(body);

    let message = match kind {
        MessageType::Init | MessageType::Version => {
            let version = r.read_u32()?;
            let mut extensions = Vec::new();
            while r.remaining() > 0 {
                let name = r.read_string()?;
                let data = r.read_string()?;
                extensions.push((name, data));
            }
            if kind == MessageType::Init {
                Message::Init {
                    version,
                    extensions,
                }
            } else {
                Message::Version {
                    version,
                    extensions,
                }
            }
        }
        MessageType::Open => Message::Open {
            id: r.read_u32()?,
            filename: r.read_string()?,
            flags: OpenFlags(r.read_u32()?),
            attrs: FileAttributes::decode(&mut r)?,
        },
        MessageType::Close => Message::Close {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
        },
        MessageType::Read => Message::Read {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
            offset: r.read_u64()?,
            len: r.read_u32()?,
        },
        MessageType::Write => Message::Write {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
            offset: r.read_u64()?,
            data: Bytes::from(r.read_bytes()?),
        },
        MessageType::Fstat => Message::Fstat {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
        },
        MessageType::Opendir => Message::Opendir {
            id: r.read_u32()?,
            path: r.read_string()?,
        },
        MessageType::Readdir => Message::Readdir {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
        },
        MessageType::Remove => Message::Remove {
            id: r.read_u32()?,
            filename: r.read_string()?,
        },
        MessageType::Mkdir => Message::Mkdir {
            id: r.read_u32()?,
            path: r.read_string()?,
            attrs: FileAttributes::decode(&mut r)?,
        },
        MessageType::Rmdir => Message::Rmdir {
            id: r.read_u32()?,
            path: r.read_string()?,
        },
        MessageType::Realpath => Message::Realpath {
            id: r.read_u32()?,
            path: r.read_string()?,
        },
        MessageType::Stat => Message::Stat {
            id: r.read_u32()?,
            path: r.read_string()?,
        },
        MessageType::Rename => Message::Rename {
            id: r.read_u32()?,
            from: r.read_string()?,
            to: r.read_string()?,
        },
        MessageType::Status => {
            let id = r.read_u32()?;
            let code = StatusCode::from_u32(r.read_u32()?);
            // 部分服务器省略 message / language
            let message = if r.remaining() > 0 {
                r.read_string()?
            } else {
                String::new()
            };
            let language = if r.remaining() > 0 {
                r.read_string()?
            } else {
                String::new()
            };
            Message::Status {
                id,
                code,
                message,
                language,
            }
        }
        MessageType::Handle => Message::Handle {
            id: r.read_u32()?,
            handle: r.read_bytes()?,
        },
        MessageType::Data => {
            let id = r.read_u32()?;
            // 冗余长度字段，以帧长度为准
            let _declared = r.read_u32()?;
            let start = r.consumed();
            Message::Data {
                id,
                data: Bytes::copy_from_slice(&body[start..]),
            }
        }
        MessageType::Name => {
            let id = r.read_u32()?;
            let count = r.read_u32()? as usize;
            // 每个条目至少 12 字节
            let mut entries = Vec::with_capacity(count.min(r.remaining() / 12));
            for _ in 0..count {
                entries.push(FileEntry::decode(&mut r)?);
            }
            Message::Name { id, entries }
        }
        MessageType::Attrs => Message::Attrs {
            id: r.read_u32()?,
            attrs: FileAttributes::decode(&mut r)?,
        },
    };

    let trailing = match &message {
        Message::Data { .. } => 0,
        _ => r.remaining(),
    };
    if trailing > 0 {
        return Err(SftpError::protocol(format!(
            "{} trailing bytes after {:?} message",
            trailing, kind
        )));
    }

    Ok(message)
}

/// 重组中的 DATA 消息
#[derive(Debug)]
struct PartialData {
    id: u32,
    payload: BytesMut,
    /// 还欠的字节数
    owed: usize,
}

/// SFTP 编解码器
#[derive(Debug, Default)]
pub struct SftpCodec {
    partial: Option<PartialData>,
}

impl SftpCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否处于 DATA 重组模式
    pub fn is_reassembling(&self) -> bool {
        self.partial.is_some()
    }

    fn continue_reassembly(&mut self, src: &mut BytesMut) -> Option<Message> {
        let partial = self.partial.as_mut()?;
        let take = partial.owed.min(src.len());
        partial.payload.extend_from_slice(&src.split_to(take));
        partial.owed -= take;
        if partial.owed > 0 {
            return None;
        }

        let PartialData { id, payload, .. } = self.partial.take()?;
        Some(Message::Data {
            id,
            data: payload.freeze(),
        })
    }
}

impl Decoder for SftpCodec {
    type Item = Message;
    type Error = SftpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, SftpError> {
        if self.partial.is_some() {
            return Ok(self.continue_reassembly(src));
        }

        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length == 0 || length > MAX_MESSAGE_LEN {
            return Err(SftpError::protocol(format!(
                "Invalid message length: {}",
                length
            )));
        }
        let type_byte = src[4];
        let frame_len = 4 + length;

        if src.len() < frame_len {
            if type_byte == MessageType::Data as u8 && src.len() >= DATA_PRELUDE_LEN {
                if length < DATA_PRELUDE_LEN - 4 {
                    return Err(SftpError::protocol("DATA message too short"));
                }
                let mut prelude = src.split_to(DATA_PRELUDE_LEN);
                prelude.advance(HEADER_LEN);
                let id = prelude.get_u32();
                let payload_len = length - (DATA_PRELUDE_LEN - 4);

                let mut payload = BytesMut::with_capacity(payload_len);
                payload.extend_from_slice(&src.split_to(src.len()));
                let owed = payload_len - payload.len();
                self.partial = Some(PartialData { id, payload, owed });
                return Ok(None);
            }
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        // 先消费整帧，未知类型的错误不会卡住后续数据
        let frame = src.split_to(frame_len);
        let kind = MessageType::from_u8(type_byte).ok_or(SftpError::UnsupportedMessage(type_byte))?;
        decode_body(kind, &frame[HEADER_LEN..]).map(Some)
    }
}

impl Encoder<Message> for SftpCodec {
    type Error = SftpError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), SftpError> {
        item.encode(dst)
    }
}

// 线格式读写工具
// 所有整数为大端序，字符串为 u32 长度前缀 + 字节

use bytes::{Buf, BufMut, BytesMut};

use super::error::SftpError;

/// 带边界检查的读取器，记录累计读取偏移
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    /// 已消费的字节数
    pub fn consumed(&self) -> usize {
        self.total - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<(), SftpError> {
        if self.buf.remaining() < n {
            return Err(SftpError::protocol(format!(
                "Truncated {}: need {} bytes, have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u32(&mut self) -> Result<u32, SftpError> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64, SftpError> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64())
    }

    /// 长度前缀的字节串
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, SftpError> {
        let len = self.read_u32()? as usize;
        self.need(len, "string")?;
        let data = self.buf[..len].to_vec();
        self.buf.advance(len);
        Ok(data)
    }

    /// 长度前缀的字符串（非 UTF-8 字节按替换字符处理）
    pub fn read_string(&mut self) -> Result<String, SftpError> {
        let bytes = self.read_bytes()?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

/// 写入长度前缀的字节串
pub(crate) fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    if !data.is_empty() {
        buf.put_slice(data);
    }
}

// 请求关联
//
// 每个请求在发出前登记，收到同 id 的响应或超时后恰好完成一次。
// 迟到的响应（超时后才到达）直接丢弃。

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::attrs::FileAttributes;
use super::codec::Message;
use super::error::SftpError;
use super::protocol::StatusCode;
use super::types::FileEntry;

/// 请求期望的响应类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    /// 仅状态（CLOSE / WRITE / MKDIR 等）
    Status,
    Handle,
    Data,
    Name,
    Attrs,
}

/// 解析后的响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Ok,
    Handle(Vec<u8>),
    Data { data: Bytes, eof: bool },
    Name(Vec<FileEntry>),
    /// READDIR 收到 EOF
    EndOfListing,
    Attrs(FileAttributes),
}

pub(crate) type ReplySender = oneshot::Sender<Result<Reply, SftpError>>;

/// 根据期望类型解释响应
pub(crate) fn interpret(expect: Expect, message: Message) -> Result<Reply, SftpError> {
    match (expect, message) {
        (Expect::Status, Message::Status { code: StatusCode::Ok, .. }) => Ok(Reply::Ok),
        (Expect::Data, Message::Status { code: StatusCode::Eof, .. }) => Ok(Reply::Data {
            data: Bytes::new(),
            eof: true,
        }),
        (Expect::Name, Message::Status { code: StatusCode::Eof, .. }) => Ok(Reply::EndOfListing),
        (_, Message::Status { code: StatusCode::Ok, .. }) => Err(SftpError::protocol(format!(
            "Unexpected OK status, expected {:?}",
            expect
        ))),
        (_, Message::Status { code, message, .. }) => Err(SftpError::Status { code, message }),
        (Expect::Handle, Message::Handle { handle, .. }) => Ok(Reply::Handle(handle)),
        (Expect::Data, Message::Data { data, .. }) => Ok(Reply::Data { data, eof: false }),
        (Expect::Name, Message::Name { entries, .. }) => Ok(Reply::Name(entries)),
        (Expect::Attrs, Message::Attrs { attrs, .. }) => Ok(Reply::Attrs(attrs)),
        (expect, other) => Err(SftpError::protocol(format!(
            "Expected {:?} reply, got {:?}",
            expect,
            other.message_type()
        ))),
    }
}

struct PendingRequest {
    expect: Expect,
    reply: ReplySender,
    timer: Option<AbortHandle>,
    /// 区分重用同一 id 的先后请求，防止旧定时器误伤新请求
    generation: u64,
}

/// 在途请求表
#[derive(Default)]
pub(crate) struct Correlator {
    pending: HashMap<u32, PendingRequest>,
    generation: u64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配随机 id，与在途请求冲突时重新生成
    pub fn next_id(&self) -> u32 {
        self.next_id_with(rand::random::<u32>)
    }

    fn next_id_with(&self, mut generate: impl FnMut() -> u32) -> u32 {
        loop {
            let id = generate();
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// 登记请求，返回用于超时校验的代号
    pub fn register(&mut self, id: u32, expect: Expect, reply: ReplySender) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.pending.insert(
            id,
            PendingRequest {
                expect,
                reply,
                timer: None,
                generation,
            },
        );
        generation
    }

    pub fn attach_timer(&mut self, id: u32, timer: AbortHandle) {
        match self.pending.get_mut(&id) {
            Some(request) => request.timer = Some(timer),
            None => timer.abort(),
        }
    }

    #[cfg(test)]
    pub fn contains(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// 按 id 完成请求，未知 id 丢弃并返回 false
    pub fn resolve(&mut self, message: Message) -> bool {
        let Some(id) = message.id() else {
            warn!("[SFTP] Unexpected {:?} message after handshake", message.message_type());
            return false;
        };
        let Some(request) = self.pending.remove(&id) else {
            debug!(
                "[SFTP] Dropping late or unknown reply {} ({:?})",
                id,
                message.message_type()
            );
            return false;
        };
        if let Some(timer) = request.timer {
            timer.abort();
        }
        let _ = request.reply.send(interpret(request.expect, message));
        true
    }

    /// 以指定错误完成单个请求
    pub fn fail(&mut self, id: u32, error: SftpError) {
        if let Some(request) = self.pending.remove(&id) {
            if let Some(timer) = request.timer {
                timer.abort();
            }
            let _ = request.reply.send(Err(error));
        }
    }

    /// 超时处理，代号不匹配说明请求已完成且 id 被重用
    pub fn expire(&mut self, id: u32, generation: u64, after: std::time::Duration) -> bool {
        match self.pending.get(&id) {
            Some(request) if request.generation == generation => {}
            _ => return false,
        }
        if let Some(request) = self.pending.remove(&id) {
            warn!("[SFTP] Request {} timed out after {:?}", id, after);
            let _ = request.reply.send(Err(SftpError::Timeout { id, after }));
        }
        true
    }

    /// 通道失效时让所有在途请求失败
    pub fn fail_all(&mut self, error: impl Fn() -> SftpError) {
        if !self.pending.is_empty() {
            debug!("[SFTP] Failing {} pending requests", self.pending.len());
        }
        for (_, request) in self.pending.drain() {
            if let Some(timer) = request.timer {
                timer.abort();
            }
            let _ = request.reply.send(Err(error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_interpret_eof_rules() {
        assert_eq!(
            interpret(Expect::Data, Message::status(1, StatusCode::Eof, "")).unwrap(),
            Reply::Data {
                data: Bytes::new(),
                eof: true
            }
        );
        assert_eq!(
            interpret(Expect::Name, Message::status(1, StatusCode::Eof, "")).unwrap(),
            Reply::EndOfListing
        );
        // 其他请求遇到 EOF 视为失败
        let err = interpret(Expect::Attrs, Message::status(1, StatusCode::Eof, "end")).unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::Eof));
    }

    #[test]
    fn test_interpret_failure_status_keeps_message() {
        let err = interpret(
            Expect::Handle,
            Message::status(3, StatusCode::NoSuchFile, "No such file"),
        )
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("No such file"));
    }

    #[test]
    fn test_interpret_type_mismatch() {
        let result = interpret(
            Expect::Handle,
            Message::Attrs {
                id: 1,
                attrs: FileAttributes::default(),
            },
        );
        assert!(matches!(result, Err(SftpError::Protocol(_))));
        assert!(matches!(
            interpret(Expect::Attrs, Message::status(1, StatusCode::Ok, "")),
            Err(SftpError::Protocol(_))
        ));
    }

    #[test]
    fn test_next_id_skips_in_flight() {
        let mut correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        correlator.register(7, Expect::Status, tx);

        let mut sequence = [7u32, 7, 8].into_iter();
        let id = correlator.next_id_with(|| sequence.next().unwrap());
        assert_eq!(id, 8);
    }

    #[tokio::test]
    async fn test_resolve_completes_once() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        correlator.register(42, Expect::Handle, tx);

        assert!(correlator.resolve(Message::Handle {
            id: 42,
            handle: b"h".to_vec()
        }));
        assert_eq!(rx.await.unwrap().unwrap(), Reply::Handle(b"h".to_vec()));

        // 重复响应被丢弃
        assert!(!correlator.resolve(Message::status(42, StatusCode::Ok, "")));
        assert_eq!(correlator.len(), 0);
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_dropped() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        let generation = correlator.register(5, Expect::Status, tx);

        assert!(correlator.expire(5, generation, Duration::from_secs(1)));
        assert!(matches!(
            rx.await.unwrap(),
            Err(SftpError::Timeout { id: 5, .. })
        ));
        assert!(!correlator.resolve(Message::status(5, StatusCode::Ok, "")));
    }

    #[tokio::test]
    async fn test_stale_timer_ignored_for_reused_id() {
        let mut correlator = Correlator::new();
        let (tx1, _rx1) = oneshot::channel();
        let old = correlator.register(9, Expect::Status, tx1);
        correlator.resolve(Message::status(9, StatusCode::Ok, ""));

        let (tx2, rx2) = oneshot::channel();
        correlator.register(9, Expect::Status, tx2);
        assert!(!correlator.expire(9, old, Duration::from_secs(1)));
        assert!(correlator.contains(9));

        correlator.resolve(Message::status(9, StatusCode::Ok, ""));
        assert_eq!(rx2.await.unwrap().unwrap(), Reply::Ok);
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mut correlator = Correlator::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        correlator.register(1, Expect::Status, tx1);
        correlator.register(2, Expect::Data, tx2);

        correlator.fail_all(|| SftpError::ChannelInactive);
        assert!(matches!(rx1.await.unwrap(), Err(SftpError::ChannelInactive)));
        assert!(matches!(rx2.await.unwrap(), Err(SftpError::ChannelInactive)));
        assert_eq!(correlator.len(), 0);
    }
}

// 测试辅助：内存通道与模拟 SFTP 服务器

pub(crate) mod sftp_server;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ssh::channel::{ChannelEvent, ChannelTransport};
use crate::ssh::SshError;

/// 内存通道的客户端一侧
pub(crate) struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    resizes: Arc<Mutex<Vec<(u32, u32)>>>,
    closed: Arc<Mutex<bool>>,
}

/// 内存通道的远端一侧
pub(crate) struct MemoryPeer {
    /// 客户端写出的数据
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    /// 向客户端投递事件
    pub events: mpsc::UnboundedSender<ChannelEvent>,
    pub resizes: Arc<Mutex<Vec<(u32, u32)>>>,
    pub closed: Arc<Mutex<bool>>,
}

pub(crate) fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let resizes = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(Mutex::new(false));
    (
        MemoryTransport {
            outbound: out_tx,
            inbound: ev_rx,
            resizes: resizes.clone(),
            closed: closed.clone(),
        },
        MemoryPeer {
            outbound: out_rx,
            events: ev_tx,
            resizes,
            closed,
        },
    )
}

impl MemoryPeer {
    pub fn send_data(&self, data: impl Into<Vec<u8>>) {
        let _ = self.events.send(ChannelEvent::Data(data.into()));
    }

    pub fn send_stderr(&self, data: impl Into<Vec<u8>>) {
        let _ = self.events.send(ChannelEvent::ExtendedData {
            ext: 1,
            data: data.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// 客户端已写出但尚未读取的字节
    pub fn drain_outbound(&mut self) -> Vec<u8> {
        let mut all = Vec::new();
        while let Ok(chunk) = self.outbound.try_recv() {
            all.extend_from_slice(&chunk);
        }
        all
    }
}

#[async_trait]
impl ChannelTransport for MemoryTransport {
    async fn send(&mut self, data: &[u8]) -> Result<(), SshError> {
        self.outbound
            .send(data.to_vec())
            .map_err(|_| SshError::ChannelInactive)
    }

    async fn recv(&mut self) -> Option<ChannelEvent> {
        self.inbound.recv().await
    }

    async fn window_change(&mut self, cols: u32, rows: u32) -> Result<(), SshError> {
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SshError> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

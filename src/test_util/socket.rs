use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc;

use crate::protocol::block::{Block, BlockType};
use crate::transport::{CancelScope, SocketAdapter, SocketError};

/// An in-memory [SocketAdapter]: received chunks are scripted by the test, sent bytes are
///  recorded. Each `send` call is recorded separately, and since the session sends one frame per
///  call, recorded sends can be decoded as blocks.
pub struct ScriptedSocket {
    inbound_sender: mpsc::UnboundedSender<Bytes>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    sent: Mutex<Vec<Bytes>>,
    connected: AtomicBool,
    refuse: AtomicBool,
    num_opened: AtomicUsize,
    cancel_scope: CancelScope,
}
impl ScriptedSocket {
    pub fn new() -> ScriptedSocket {
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        ScriptedSocket {
            inbound_sender,
            inbound: tokio::sync::Mutex::new(inbound),
            sent: Default::default(),
            connected: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            num_opened: AtomicUsize::new(0),
            cancel_scope: CancelScope::new(),
        }
    }

    /// makes subsequent `open` calls fail as if the server refused the connection
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    pub fn num_opened(&self) -> usize {
        self.num_opened.load(Ordering::Acquire)
    }

    /// scripts a chunk of raw bytes to be returned by `receive`
    pub fn push(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            let _ = self.inbound_sender.send(chunk);
        }
    }

    pub fn push_block(&self, block_type: BlockType, body: &[u8]) {
        match Block::encode(block_type, body) {
            Ok(frame) => self.push(frame),
            Err(e) => panic!("invalid test block: {}", e),
        }
    }

    /// scripts an orderly close by the remote side
    pub fn close_remote(&self) {
        let _ = self.inbound_sender.send(Bytes::new());
    }

    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sent_blocks(&self) -> Vec<Block> {
        Self::decode_frames(self.sent_frames())
    }

    /// returns the blocks sent so far, clearing the internal buffer
    pub fn take_sent_blocks(&self) -> Vec<Block> {
        let frames = std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()));
        Self::decode_frames(frames)
    }

    fn decode_frames(frames: Vec<Bytes>) -> Vec<Block> {
        frames.into_iter()
            .map(|f| match Block::decode(f) {
                Ok(block) => block,
                Err(e) => panic!("sent data is not a single block: {}", e),
            })
            .collect()
    }
}

impl Default for ScriptedSocket {
    fn default() -> Self {
        ScriptedSocket::new()
    }
}

#[async_trait]
impl SocketAdapter for ScriptedSocket {
    async fn open(&self, _host: &str, _port: u16) -> Result<(), SocketError> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(SocketError::Refused);
        }
        self.cancel_scope.renew();
        self.num_opened.fetch_add(1, Ordering::AcqRel);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), SocketError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(SocketError::NotConnected);
        }
        self.sent.lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes, SocketError> {
        let token = self.cancel_scope.current();
        let mut inbound = self.inbound.lock().await;
        let chunk = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            chunk = inbound.recv() => chunk.unwrap_or_default(),
        };
        if chunk.is_empty() {
            self.connected.store(false, Ordering::Release);
        }
        Ok(chunk)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.cancel_scope.cancel();
    }

    fn cancel(&self) {
        self.cancel_scope.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

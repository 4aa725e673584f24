use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, TransportKind};

pub mod tcp;
pub mod websocket;

/// Classification of socket level failures. Only the framed transport looks at these, nothing
///  is propagated past the connection as an error.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket operation was canceled")]
    Canceled,
    #[error("connection refused")]
    Refused,
    #[error("socket is not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Uniform access to a stream or message oriented connection. Implementations know nothing about
///  framing, they move raw bytes.
///
/// `open` can be called again after a failed or closed connection and creates a fresh underlying
///  socket. `cancel` unblocks all pending operations promptly, they return
///  [SocketError::Canceled].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SocketAdapter: Send + Sync {
    async fn open(&self, host: &str, port: u16) -> Result<(), SocketError>;

    async fn send(&self, data: &[u8]) -> Result<(), SocketError>;

    /// Waits for the next chunk of received bytes. An empty chunk signals an orderly close by the
    ///  remote side.
    async fn receive(&self) -> Result<Bytes, SocketError>;

    async fn close(&self);

    fn cancel(&self);

    fn is_connected(&self) -> bool;
}

pub fn create_socket(config: &ClientConfig) -> Arc<dyn SocketAdapter> {
    match config.transport {
        TransportKind::Tcp => Arc::new(tcp::TcpSocketAdapter::new(config.receive_buffer_size)),
        TransportKind::WebSocket => Arc::new(websocket::WebSocketAdapter::new(config.receive_buffer_size)),
    }
}

/// Helper for the cancellation token of the current socket generation: it is replaced on every
///  `open`, and a poisoned lock does not prevent access to it.
pub(crate) struct CancelScope {
    token: std::sync::Mutex<CancellationToken>,
}
impl CancelScope {
    pub fn new() -> CancelScope {
        CancelScope {
            token: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    pub fn current(&self) -> CancellationToken {
        self.token.lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn renew(&self) -> CancellationToken {
        let mut token = self.token.lock()
            .unwrap_or_else(|e| e.into_inner());
        *token = CancellationToken::new();
        token.clone()
    }

    pub fn cancel(&self) {
        self.current().cancel();
    }
}

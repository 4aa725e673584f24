use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::framer::{Framer, FramerState};
use crate::transport::{SocketAdapter, SocketError};

/// Connects a socket adapter with a framer: received chunks are turned into complete frames,
///  and already encoded frames are sent as they are.
///
/// Socket failures end here. Canceling is silent, a refused connection is a failed open, and
///  everything else is reported and closes the connection.
pub struct FramedTransport {
    socket: Arc<dyn SocketAdapter>,
    framer: Mutex<Framer>,
    destroyed: AtomicBool,
}
impl FramedTransport {
    pub fn new(socket: Arc<dyn SocketAdapter>, max_block_body_len: usize) -> FramedTransport {
        FramedTransport {
            socket,
            framer: Mutex::new(Framer::new(max_block_body_len)),
            destroyed: AtomicBool::new(false),
        }
    }

    pub async fn open(&self, host: &str, port: u16) -> bool {
        if self.destroyed.load(Ordering::Acquire) {
            warn!("transport was destroyed, not opening a connection");
            return false;
        }

        match self.socket.open(host, port).await {
            Ok(()) => {
                info!("connected to {}:{}", host, port);
                true
            }
            Err(SocketError::Refused) => {
                info!("connection to {}:{} was refused", host, port);
                false
            }
            Err(SocketError::Canceled) => {
                debug!("connecting to {}:{} was canceled", host, port);
                false
            }
            Err(e) => {
                error!("error connecting to {}:{}: {}", host, port, e);
                false
            }
        }
    }

    pub async fn start(&self) {
        self.framer.lock().await.start();
    }

    pub async fn framer_state(&self) -> FramerState {
        self.framer.lock().await.state()
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Waits for the next chunk from the socket, returning the frames it completes (which may be
    ///  none). `None` means the connection ended, either regularly or due to an error, and the
    ///  transport is closed.
    pub async fn receive_next(&self) -> Option<Vec<Bytes>> {
        if self.framer.lock().await.state() == FramerState::Closed {
            return None;
        }

        match self.socket.receive().await {
            Ok(chunk) if chunk.is_empty() => {
                debug!("connection closed by peer");
                self.receive_end().await;
                None
            }
            Ok(chunk) => {
                trace!("received chunk of {} bytes", chunk.len());
                Some(self.framer.lock().await.feed(&chunk))
            }
            Err(SocketError::Canceled) => {
                debug!("receiving was canceled");
                self.receive_end().await;
                None
            }
            Err(e) => {
                error!("error receiving from socket: {}", e);
                self.receive_end().await;
                None
            }
        }
    }

    async fn receive_end(&self) {
        self.framer.lock().await.close();
        self.socket.close().await;
    }

    /// sends an encoded frame
    pub async fn dispatch(&self, frame: &[u8]) {
        if !self.socket.is_connected() {
            warn!("socket is not connected, dropping frame of {} bytes", frame.len());
            return;
        }
        if self.framer.lock().await.state() == FramerState::Closed {
            warn!("transport is closed, dropping frame of {} bytes", frame.len());
            return;
        }

        match self.socket.send(frame).await {
            Ok(()) => {}
            Err(SocketError::Canceled) => debug!("sending was canceled"),
            Err(e) => error!("error sending {} bytes: {}", frame.len(), e),
        }
    }

    pub async fn close(&self) {
        self.framer.lock().await.close();
        self.socket.cancel();
        self.socket.close().await;
    }

    /// closes the connection for good, the transport can not be opened again
    pub async fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.close().await;
    }
}

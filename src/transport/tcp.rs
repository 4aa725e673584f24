use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::transport::{CancelScope, SocketAdapter, SocketError};

struct TcpReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
}

/// A plain TCP connection. Reading and writing use separate halves of the stream so that a
///  pending receive does not block sending.
pub struct TcpSocketAdapter {
    reader: Mutex<Option<TcpReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    receive_buffer_size: usize,
    cancel_scope: CancelScope,
}
impl TcpSocketAdapter {
    pub fn new(receive_buffer_size: usize) -> TcpSocketAdapter {
        TcpSocketAdapter {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            receive_buffer_size,
            cancel_scope: CancelScope::new(),
        }
    }

    fn classify(e: std::io::Error) -> SocketError {
        match e.kind() {
            ErrorKind::ConnectionRefused => SocketError::Refused,
            _ => SocketError::Io(e),
        }
    }

    async fn drop_stream(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.reader.lock().await.take();
    }
}

#[async_trait]
impl SocketAdapter for TcpSocketAdapter {
    async fn open(&self, host: &str, port: u16) -> Result<(), SocketError> {
        // a previous connection is discarded rather than reused
        self.cancel_scope.cancel();
        self.drop_stream().await;

        let token = self.cancel_scope.renew();
        debug!("connecting to {}:{}", host, port);
        let stream = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            result = TcpStream::connect((host, port)) => result.map_err(Self::classify)?,
        };
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(TcpReader {
            half: read_half,
            buf: vec![0u8; self.receive_buffer_size],
        });
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), SocketError> {
        let token = self.cancel_scope.current();
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SocketError::NotConnected)?;

        let result = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            result = writer.write_all(data) => result,
        };
        if let Err(e) = result {
            self.connected.store(false, Ordering::Release);
            return Err(Self::classify(e));
        }
        trace!("sent {} bytes", data.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes, SocketError> {
        let token = self.cancel_scope.current();
        let mut reader = self.reader.lock().await;
        let TcpReader { half, buf } = reader.as_mut().ok_or(SocketError::NotConnected)?;

        let num_read = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            result = half.read(buf) => match result {
                Ok(n) => n,
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    return Err(Self::classify(e));
                }
            },
        };

        if num_read == 0 {
            debug!("connection closed by peer");
            self.connected.store(false, Ordering::Release);
        }
        trace!("received {} bytes", num_read);
        Ok(Bytes::copy_from_slice(&buf[..num_read]))
    }

    async fn close(&self) {
        self.cancel_scope.cancel();
        self.drop_stream().await;
    }

    fn cancel(&self) {
        self.cancel_scope.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

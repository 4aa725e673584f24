use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::transport::{CancelScope, SocketAdapter, SocketError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsReader {
    stream: SplitStream<WsStream>,
    /// the part of the last received message that was not handed out yet
    pending: Bytes,
}

/// A WebSocket client connection exchanging binary messages. Message boundaries carry no meaning
///  for the framing, so received messages are handed out as a byte stream in chunks of at most
///  the configured receive buffer size.
pub struct WebSocketAdapter {
    reader: Mutex<Option<WsReader>>,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    connected: AtomicBool,
    receive_buffer_size: usize,
    cancel_scope: CancelScope,
}
impl WebSocketAdapter {
    pub fn new(receive_buffer_size: usize) -> WebSocketAdapter {
        WebSocketAdapter {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            receive_buffer_size,
            cancel_scope: CancelScope::new(),
        }
    }

    fn classify(e: WsError) -> SocketError {
        match e {
            WsError::Io(io) if io.kind() == ErrorKind::ConnectionRefused => SocketError::Refused,
            WsError::Io(io) => SocketError::Io(io),
            other => SocketError::WebSocket(other.to_string()),
        }
    }

    async fn drop_stream(&self) {
        self.connected.store(false, Ordering::Release);
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.close().await;
        }
        self.reader.lock().await.take();
    }

    fn on_closed(&self) -> Result<Bytes, SocketError> {
        debug!("WebSocket closed by peer");
        self.connected.store(false, Ordering::Release);
        Ok(Bytes::new())
    }
}

#[async_trait]
impl SocketAdapter for WebSocketAdapter {
    async fn open(&self, host: &str, port: u16) -> Result<(), SocketError> {
        self.cancel_scope.cancel();
        self.drop_stream().await;

        let token = self.cancel_scope.renew();
        let url = format!("ws://{}:{}", host, port);
        debug!("connecting to {}", url);
        let (stream, _) = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            result = connect_async(url) => result.map_err(Self::classify)?,
        };

        let (sink, stream) = stream.split();
        *self.reader.lock().await = Some(WsReader {
            stream,
            pending: Bytes::new(),
        });
        *self.writer.lock().await = Some(sink);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), SocketError> {
        let token = self.cancel_scope.current();
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(SocketError::NotConnected)?;

        let result = select! {
            _ = token.cancelled() => return Err(SocketError::Canceled),
            result = writer.send(Message::Binary(data.to_vec().into())) => result,
        };
        if let Err(e) = result {
            self.connected.store(false, Ordering::Release);
            return Err(Self::classify(e));
        }
        trace!("sent message of {} bytes", data.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes, SocketError> {
        let token = self.cancel_scope.current();
        let mut reader = self.reader.lock().await;
        let WsReader { stream, pending } = reader.as_mut().ok_or(SocketError::NotConnected)?;

        loop {
            if !pending.is_empty() {
                let chunk_len = pending.len().min(self.receive_buffer_size);
                return Ok(pending.split_to(chunk_len));
            }

            let message = select! {
                _ = token.cancelled() => return Err(SocketError::Canceled),
                message = stream.next() => message,
            };

            match message {
                None => return self.on_closed(),
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::Release);
                    return Err(Self::classify(e));
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!("received message of {} bytes", data.len());
                    *pending = data;
                }
                Some(Ok(Message::Text(text))) => {
                    trace!("received text message of {} bytes, treating it as binary", text.len());
                    *pending = Bytes::copy_from_slice(text.as_bytes());
                }
                Some(Ok(Message::Close(_))) => return self.on_closed(),
                Some(Ok(_)) => {} // ping / pong are handled by tungstenite
            }
        }
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

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::{debug, trace, warn};

use crate::protocol::block::{Block, BlockType};
use crate::protocol::framed_transport::FramedTransport;
use crate::transport::SocketAdapter;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SessionState {
    /// connected, no handshake sent yet
    Start,
    /// handshake sent, waiting for the acknowledgement
    Handshake,
    Work,
    Closed,
}

/// Receives the blocks that are valid in the session's current state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlockHandler: Send + Sync {
    async fn on_block(&self, block: Block);

    /// called exactly once when the receive loop ends, for whatever reason
    async fn on_disconnect(&self);
}

/// The connection phase state machine: it decides which received blocks are passed on, and it
///  advances through the handshake as blocks are sent.
pub struct Session {
    state: AtomicU8,
    transport: FramedTransport,
}
impl Session {
    pub fn new(socket: Arc<dyn SocketAdapter>, max_block_body_len: usize) -> Session {
        Session {
            state: AtomicU8::new(SessionState::Closed.into()),
            transport: FramedTransport::new(socket, max_block_body_len),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(SessionState::Closed)
    }

    fn set_state(&self, state: SessionState) {
        let old = self.state.swap(state.into(), Ordering::AcqRel);
        if old != u8::from(state) {
            debug!("session state {:?} -> {:?}", SessionState::try_from(old).unwrap_or(SessionState::Closed), state);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn open(&self, host: &str, port: u16) -> bool {
        self.transport.open(host, port).await
    }

    /// starts a freshly opened connection, to be called before [Session::run]
    pub async fn start(&self) {
        self.transport.start().await;
        self.set_state(SessionState::Start);
    }

    /// Which block types are processed in which state - everything else is dropped.
    pub fn accepts(state: SessionState, block_type: BlockType) -> bool {
        use BlockType::*;

        match state {
            SessionState::Start => matches!(block_type, Heartbeat),
            SessionState::Handshake => matches!(block_type, HandshakeAcknowledgement | Kick),
            SessionState::Work => matches!(block_type, Heartbeat | Kick | Data),
            SessionState::Closed => false,
        }
    }

    /// The receive loop: runs until the connection ends, passing every accepted block to the
    ///  handler. Blocks are handled one at a time in the order they were received.
    pub async fn run(&self, handler: &dyn BlockHandler) {
        debug!("starting receive loop");

        while let Some(frames) = self.transport.receive_next().await {
            for frame in frames {
                let block = match Block::decode(frame) {
                    Ok(block) => block,
                    Err(e) => {
                        warn!("dropping invalid block: {}", e);
                        continue;
                    }
                };

                let state = self.state();
                if Self::accepts(state, block.block_type) {
                    trace!("received {:?}", block);
                    handler.on_block(block).await;
                }
                else if state != SessionState::Closed {
                    warn!("dropping {:?} received in state {:?}", block, state);
                }
            }
        }

        debug!("receive loop ended");
        self.set_state(SessionState::Closed);
        handler.on_disconnect().await;
    }

    async fn dispatch_block(&self, block_type: BlockType, body: &[u8]) {
        match Block::encode(block_type, body) {
            Ok(frame) => self.transport.dispatch(&frame).await,
            Err(e) => warn!("not sending {:?}: {}", block_type, e),
        }
    }

    /// sends an encoded payload as a Data block
    pub async fn send(&self, payload: &[u8]) {
        if self.state() == SessionState::Closed {
            warn!("session is closed, not sending payload of {} bytes", payload.len());
            return;
        }
        self.dispatch_block(BlockType::Data, payload).await;
    }

    pub async fn heartbeat(&self) {
        if self.state() == SessionState::Closed {
            trace!("session is closed, not sending heartbeat");
            return;
        }
        self.dispatch_block(BlockType::Heartbeat, &[]).await;
    }

    pub async fn handshake(&self, body: &[u8]) {
        let state = self.state();
        if state != SessionState::Start {
            warn!("handshake is only possible right after connecting, state is {:?}", state);
            return;
        }
        self.set_state(SessionState::Handshake);
        self.dispatch_block(BlockType::Handshake, body).await;
    }

    /// Moves from Handshake to Work and sends the acknowledgement. Returns `false` if the
    ///  session was not in Handshake, in which case nothing is sent.
    pub async fn acknowledge(&self, body: &[u8]) -> bool {
        if self.state.compare_exchange(SessionState::Handshake.into(), SessionState::Work.into(), Ordering::AcqRel, Ordering::Acquire).is_err() {
            warn!("acknowledgement is only possible during handshake, state is {:?}", self.state());
            return false;
        }
        self.dispatch_block(BlockType::HandshakeAcknowledgement, body).await;
        true
    }

    /// Closes the connection. The receive loop ends as a consequence, notifying the handler.
    pub async fn disconnect(&self) {
        self.set_state(SessionState::Closed);
        self.transport.close().await;
    }

    pub async fn destroy(&self) {
        self.set_state(SessionState::Closed);
        self.transport.destroy().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::protocol::block::MAX_BODY_LEN;
    use crate::test_util::socket::ScriptedSocket;

    #[rstest]
    #[case::start_heartbeat(SessionState::Start, BlockType::Heartbeat, true)]
    #[case::start_data(SessionState::Start, BlockType::Data, false)]
    #[case::start_ack(SessionState::Start, BlockType::HandshakeAcknowledgement, false)]
    #[case::start_kick(SessionState::Start, BlockType::Kick, false)]
    #[case::start_handshake(SessionState::Start, BlockType::Handshake, false)]
    #[case::handshake_ack(SessionState::Handshake, BlockType::HandshakeAcknowledgement, true)]
    #[case::handshake_kick(SessionState::Handshake, BlockType::Kick, true)]
    #[case::handshake_data(SessionState::Handshake, BlockType::Data, false)]
    #[case::handshake_heartbeat(SessionState::Handshake, BlockType::Heartbeat, false)]
    #[case::handshake_handshake(SessionState::Handshake, BlockType::Handshake, false)]
    #[case::work_heartbeat(SessionState::Work, BlockType::Heartbeat, true)]
    #[case::work_kick(SessionState::Work, BlockType::Kick, true)]
    #[case::work_data(SessionState::Work, BlockType::Data, true)]
    #[case::work_ack(SessionState::Work, BlockType::HandshakeAcknowledgement, false)]
    #[case::work_handshake(SessionState::Work, BlockType::Handshake, false)]
    #[case::closed_heartbeat(SessionState::Closed, BlockType::Heartbeat, false)]
    #[case::closed_data(SessionState::Closed, BlockType::Data, false)]
    #[case::closed_kick(SessionState::Closed, BlockType::Kick, false)]
    fn test_accepts(#[case] state: SessionState, #[case] block_type: BlockType, #[case] expected: bool) {
        assert_eq!(Session::accepts(state, block_type), expected);
    }

    async fn started_session() -> (Arc<ScriptedSocket>, Session) {
        let socket = Arc::new(ScriptedSocket::new());
        let session = Session::new(socket.clone(), MAX_BODY_LEN);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.open("localhost", 1234).await);
        session.start().await;
        assert_eq!(session.state(), SessionState::Start);
        (socket, session)
    }

    #[tokio::test]
    async fn test_data_before_handshake_is_dropped() {
        let (socket, session) = started_session().await;

        let mut handler = MockBlockHandler::new();
        handler.expect_on_block()
            .withf(|b| b.block_type == BlockType::Heartbeat)
            .times(1)
            .return_const(());
        handler.expect_on_disconnect().times(1).return_const(());

        socket.push_block(BlockType::Data, b"early");
        socket.push_block(BlockType::HandshakeAcknowledgement, b"ack");
        socket.push_block(BlockType::Heartbeat, b"");
        socket.push_block(BlockType::Kick, b"1");
        socket.close_remote();

        session.run(&handler).await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_handshake_flow() {
        let (socket, session) = started_session().await;

        assert!(!session.acknowledge(b"too early").await);
        assert_eq!(session.state(), SessionState::Start);

        session.handshake(b"h1").await;
        assert_eq!(session.state(), SessionState::Handshake);

        session.handshake(b"h2").await;
        assert_eq!(session.state(), SessionState::Handshake);

        assert!(session.acknowledge(b"ack").await);
        assert_eq!(session.state(), SessionState::Work);
        assert!(!session.acknowledge(b"again").await);

        session.send(b"payload").await;
        session.heartbeat().await;

        assert_eq!(socket.sent_blocks(), vec![
            Block::new(BlockType::Handshake, &b"h1"[..]),
            Block::new(BlockType::HandshakeAcknowledgement, &b"ack"[..]),
            Block::new(BlockType::Data, &b"payload"[..]),
            Block::new(BlockType::Heartbeat, &b""[..]),
        ]);
    }

    #[tokio::test]
    async fn test_acknowledge_after_disconnect_is_ignored() {
        let (socket, session) = started_session().await;
        session.handshake(b"h1").await;
        session.disconnect().await;

        assert!(!session.acknowledge(b"ack").await);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(socket.sent_blocks(), vec![Block::new(BlockType::Handshake, &b"h1"[..])]);
    }

    #[tokio::test]
    async fn test_gating_follows_state_within_one_chunk() {
        let (socket, session) = started_session().await;
        session.handshake(b"h").await;

        struct AckingHandler {
            session: Arc<Session>,
            received: std::sync::Mutex<Vec<BlockType>>,
        }
        #[async_trait]
        impl BlockHandler for AckingHandler {
            async fn on_block(&self, block: Block) {
                self.received.lock().unwrap().push(block.block_type);
                if block.block_type == BlockType::HandshakeAcknowledgement {
                    self.session.acknowledge(b"").await;
                }
            }
            async fn on_disconnect(&self) {}
        }

        let session = Arc::new(session);
        let handler = AckingHandler {
            session: session.clone(),
            received: Default::default(),
        };

        let mut chunk = Vec::new();
        chunk.extend_from_slice(&Block::encode(BlockType::Data, b"too early").unwrap());
        chunk.extend_from_slice(&Block::encode(BlockType::HandshakeAcknowledgement, b"").unwrap());
        chunk.extend_from_slice(&Block::encode(BlockType::Data, b"in time").unwrap());
        chunk.extend_from_slice(&Block::encode(BlockType::HandshakeAcknowledgement, b"").unwrap());
        socket.push(chunk);
        socket.close_remote();

        session.run(&handler).await;
        assert_eq!(*handler.received.lock().unwrap(), vec![BlockType::HandshakeAcknowledgement, BlockType::Data]);
    }

    #[tokio::test]
    async fn test_invalid_block_type_is_dropped() {
        let (socket, session) = started_session().await;

        let mut handler = MockBlockHandler::new();
        handler.expect_on_block().times(1).return_const(());
        handler.expect_on_disconnect().times(1).return_const(());

        socket.push(b"\x09\0\0\x02ab\x02\0\0\0".to_vec());
        socket.close_remote();

        session.run(&handler).await;
    }

    #[tokio::test]
    async fn test_disconnect_ends_receive_loop() {
        let (socket, session) = started_session().await;
        let session = Arc::new(session);

        let mut handler = MockBlockHandler::new();
        handler.expect_on_block().never();
        handler.expect_on_disconnect().times(1).return_const(());

        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.run(&handler).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.disconnect().await;
        tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!socket.is_connected());

        // nothing is sent once closed
        session.send(b"late").await;
        session.heartbeat().await;
        assert!(socket.sent_blocks().is_empty());
    }
}

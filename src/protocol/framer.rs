use bytes::{BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::protocol::block::{Block, HEAD_SIZE, MAX_BODY_LEN};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FramerState {
    Head,
    Body,
    Closed,
}

/// Incrementally assembles blocks from arbitrarily chunked bytes as they are read from a socket.
///
/// A chunk can contain part of a header, the rest of a block started in an earlier chunk, several
///  complete blocks, or any combination of these. Every byte of a chunk is consumed exactly once,
///  and complete frames (header plus body) are emitted in the order they arrived.
pub struct Framer {
    state: FramerState,
    head: [u8; HEAD_SIZE],
    /// accumulates the current frame, including its header
    buffer: BytesMut,
    /// number of bytes of the current header or frame received so far
    offset: usize,
    expected_body_len: usize,
    max_body_len: usize,
}
impl Framer {
    pub fn new(max_body_len: usize) -> Framer {
        Framer {
            state: FramerState::Closed,
            head: [0; HEAD_SIZE],
            buffer: BytesMut::new(),
            offset: 0,
            expected_body_len: 0,
            max_body_len: max_body_len.min(MAX_BODY_LEN),
        }
    }

    pub fn state(&self) -> FramerState {
        self.state
    }

    /// (re)starts reading at a block boundary, discarding any partially received frame
    pub fn start(&mut self) {
        self.reset_to_head();
    }

    pub fn close(&mut self) {
        self.state = FramerState::Closed;
        self.buffer = BytesMut::new();
        self.offset = 0;
    }

    /// Consumes a chunk of received bytes, returning all frames that were completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let mut pos = 0;

        while pos < chunk.len() || self.completes_empty_body() {
            match self.state {
                FramerState::Closed => {
                    trace!("framer is closed, ignoring {} bytes", chunk.len() - pos);
                    break;
                }
                FramerState::Head => {
                    let needed = HEAD_SIZE - self.offset;
                    let available = chunk.len() - pos;
                    if available < needed {
                        self.head[self.offset..self.offset + available].copy_from_slice(&chunk[pos..]);
                        self.offset += available;
                        break;
                    }

                    self.head[self.offset..].copy_from_slice(&chunk[pos..pos + needed]);
                    pos += needed;
                    self.on_head_complete();
                }
                FramerState::Body => {
                    let needed = HEAD_SIZE + self.expected_body_len - self.offset;
                    let available = chunk.len() - pos;
                    if available < needed {
                        self.buffer.put_slice(&chunk[pos..]);
                        self.offset += available;
                        break;
                    }

                    self.buffer.put_slice(&chunk[pos..pos + needed]);
                    pos += needed;

                    let frame = self.buffer.split().freeze();
                    trace!("completed frame of {} bytes", frame.len());
                    frames.push(frame);
                    self.reset_to_head();
                }
            }
        }

        frames
    }

    /// a block without body is complete as soon as its header is, even if the chunk ends there
    fn completes_empty_body(&self) -> bool {
        self.state == FramerState::Body && self.offset == HEAD_SIZE && self.expected_body_len == 0
    }

    fn on_head_complete(&mut self) {
        let mut body_len = Block::body_len_from_header(&self.head);
        if body_len > self.max_body_len {
            warn!("block header announces a body of {} bytes which exceeds the maximum of {} - treating it as header only", body_len, self.max_body_len);
            body_len = 0;
        }

        self.expected_body_len = body_len;
        self.buffer = BytesMut::with_capacity(HEAD_SIZE + body_len);
        self.buffer.put_slice(&self.head);
        self.offset = HEAD_SIZE;
        self.state = FramerState::Body;
    }

    fn reset_to_head(&mut self) {
        self.state = FramerState::Head;
        self.head = [0; HEAD_SIZE];
        self.offset = 0;
        self.expected_body_len = 0;
    }
}

use std::fmt::{Debug, Formatter};

use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Header of every block on the wire: one byte block type, followed by the body length as a
///  three-byte big-endian unsigned number.
///
/// ```ascii
/// 0: block type (u8)
/// 1: body length (u24 BE)
/// 4: body
/// ```
pub const HEAD_SIZE: usize = 4;

/// the largest body length that fits into the three length bytes of the header
pub const MAX_BODY_LEN: usize = 0xFF_FFFF;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BlockType {
    Handshake = 0,
    HandshakeAcknowledgement = 1,
    Heartbeat = 2,
    /// carries an encoded RPC payload
    Data = 3,
    /// sent by the server before it drops the connection, the body is the disconnect reason
    Kick = 4,
}

#[derive(Clone, Eq, PartialEq)]
pub struct Block {
    pub block_type: BlockType,
    pub body: Bytes,
}
impl Debug for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block{{{:?}, {} bytes}}", self.block_type, self.body.len())
    }
}

impl Block {
    pub fn new(block_type: BlockType, body: impl Into<Bytes>) -> Block {
        Block {
            block_type,
            body: body.into(),
        }
    }

    pub fn encode(block_type: BlockType, body: &[u8]) -> anyhow::Result<Bytes> {
        if body.len() > MAX_BODY_LEN {
            bail!("block body of {} bytes exceeds the maximum of {} bytes", body.len(), MAX_BODY_LEN);
        }

        let mut buf = BytesMut::with_capacity(HEAD_SIZE + body.len());
        buf.put_u8(block_type.into());
        buf.put_uint(body.len() as u64, HEAD_SIZE - 1);
        buf.put_slice(body);
        Ok(buf.freeze())
    }

    /// Decodes a single complete frame as it is emitted by the framer. Everything after the header
    ///  is the body, the length field is not consulted.
    pub fn decode(mut frame: Bytes) -> anyhow::Result<Block> {
        if frame.len() < HEAD_SIZE {
            bail!("frame of {} bytes is shorter than the block header", frame.len());
        }

        let raw_type = frame.get_u8();
        let block_type = BlockType::try_from(raw_type)
            .map_err(|_| anyhow!("invalid block type {}", raw_type))?;

        frame.advance(HEAD_SIZE - 1);
        Ok(Block {
            block_type,
            body: frame,
        })
    }

    pub fn is_valid_type(raw_type: u8) -> bool {
        BlockType::try_from(raw_type).is_ok()
    }

    /// body length as announced in a (complete) block header
    pub fn body_len_from_header(head: &[u8; HEAD_SIZE]) -> usize {
        let mut len_bytes = &head[1..];
        len_bytes.get_uint(HEAD_SIZE - 1) as usize
    }
}

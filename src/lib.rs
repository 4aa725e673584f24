//! A client for a block framed RPC protocol over TCP or WebSocket.
//!
//! Layers, from the bottom up: socket adapters ([transport]) move raw bytes, the framer
//!  ([protocol::framer]) assembles them into blocks, the session ([protocol::session]) gates
//!  blocks by connection phase, and the commander ([rpc::commander]) correlates requests and
//!  responses, dispatches commands and keeps the connection alive. [client::Client] is the
//!  application's handle to all of this.

pub mod client;
pub mod config;
pub mod events;
pub mod protocol;
pub mod rpc;
pub mod transport;
pub mod test_util;

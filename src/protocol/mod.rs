pub mod block;
pub mod framer;
pub mod framed_transport;
pub mod session;

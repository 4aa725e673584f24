//! Utilities for testing code that talks through a client connection. They are used for testing
//!  the crate itself, but they are also exported so applications can test their callbacks
//!  without a server.

pub mod socket;
pub mod validator;

use std::time::Duration;

/// Gives spawned tasks (receive loop, timers) the chance to process everything that is pending.
///  With paused time, this advances the clock by a negligible amount.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

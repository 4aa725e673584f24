use std::time::Duration;

use anyhow::bail;

use crate::protocol::block::MAX_BODY_LEN;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransportKind {
    Tcp,
    WebSocket,
}

/// The interval at which pending requests are checked for timeouts. This is deliberately coarse:
///  a request times out somewhere between its configured timeout and one tick after that.
pub const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub transport: TransportKind,

    /// This is the maximum number of bytes read from the socket in a single call. For WebSocket,
    ///  received messages are handed to the framer in chunks of (at most) this size.
    pub receive_buffer_size: usize,

    /// A request that did not receive a response for this long is completed with a synthetic
    ///  'timeout' error response.
    pub request_timeout: Duration,

    /// The keep-alive check interval. If two of these intervals pass without any traffic from the
    ///  server, a heartbeat is sent.
    pub pulse_interval: Duration,

    /// Upper bound for the body length of incoming blocks. Blocks announcing a longer body are
    ///  treated as a protocol violation.
    pub max_block_body_len: usize,

    /// If this is set, the client sends a handshake with this payload right after connecting
    pub handshake: Option<Vec<u8>>,
}

impl ClientConfig {
    pub fn new(transport: TransportKind) -> ClientConfig {
        ClientConfig {
            transport,
            receive_buffer_size: 1024,
            request_timeout: Duration::from_secs(10),
            pulse_interval: Duration::from_secs(1),
            max_block_body_len: MAX_BODY_LEN,
            handshake: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.receive_buffer_size == 0 {
            bail!("receive buffer size must be positive");
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        if self.pulse_interval.is_zero() {
            bail!("pulse interval must be positive");
        }
        if self.max_block_body_len > MAX_BODY_LEN {
            bail!("max block body length {} exceeds what the block header can represent ({})", self.max_block_body_len, MAX_BODY_LEN);
        }

        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new(TransportKind::Tcp)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.receive_buffer_size, 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.pulse_interval, Duration::from_secs(1));
        assert_eq!(config.max_block_body_len, MAX_BODY_LEN);
        assert!(config.handshake.is_none());
        assert!(config.validate().is_ok());
    }

    #[rstest]
    #[case::zero_buffer(|c: &mut ClientConfig| c.receive_buffer_size = 0, false)]
    #[case::zero_timeout(|c: &mut ClientConfig| c.request_timeout = Duration::ZERO, false)]
    #[case::zero_pulse(|c: &mut ClientConfig| c.pulse_interval = Duration::ZERO, false)]
    #[case::body_len_too_big(|c: &mut ClientConfig| c.max_block_body_len = MAX_BODY_LEN + 1, false)]
    #[case::small_body_len(|c: &mut ClientConfig| c.max_block_body_len = 16, true)]
    #[case::websocket(|c: &mut ClientConfig| c.transport = TransportKind::WebSocket, true)]
    #[case::handshake(|c: &mut ClientConfig| c.handshake = Some(b"hi".to_vec()), true)]
    fn test_validate(#[case] modify: fn(&mut ClientConfig), #[case] expected_ok: bool) {
        let mut config = ClientConfig::default();
        modify(&mut config);
        assert_eq!(config.validate().is_ok(), expected_ok);
    }
}

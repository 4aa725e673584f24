use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DisconnectReason {
    Normal = 0,
    Timeout = 1,
    /// the server's handshake acknowledgement was rejected
    Handshake = 2,
    ServerDown = 3,
    Unknown = 4,
}

impl DisconnectReason {
    /// A Kick block's body is the decimal reason code as UTF-8 text
    pub fn from_kick_body(body: &[u8]) -> DisconnectReason {
        std::str::from_utf8(body).ok()
            .and_then(|s| s.trim().parse::<u8>().ok())
            .and_then(|code| DisconnectReason::try_from(code).ok())
            .unwrap_or(DisconnectReason::Unknown)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientEvent {
    /// result of a connection attempt
    Connected(bool),
    /// the server's handshake acknowledgement was verified, application traffic can flow
    Ready,
    Disconnected(DisconnectReason),
}

pub struct ClientEventNotifier {
    sender: broadcast::Sender<ClientEvent>,
}
impl ClientEventNotifier {
    pub fn new() -> ClientEventNotifier {
        let (sender, _) = broadcast::channel(128);

        ClientEventNotifier {
            sender
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn send_event(&self, event: ClientEvent) {
        trace!("event: {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for ClientEventNotifier {
    fn default() -> Self {
        ClientEventNotifier::new()
    }
}

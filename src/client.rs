use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ClientConfig;
use crate::events::{ClientEvent, ClientEventNotifier};
use crate::protocol::session::SessionState;
use crate::rpc::commander::Commander;
use crate::rpc::payload::{JsonSerializer, Payload, Serializer};
use crate::rpc::registry::CommandCallback;
use crate::rpc::validator::{DefaultValidator, Validator};
use crate::transport::{create_socket, SocketAdapter};

/// The application's handle to a connection. Cloning it is cheap, all clones refer to the same
///  connection.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    commander: Arc<Commander>,
    events: Arc<ClientEventNotifier>,
}
impl Client {
    pub fn new(config: ClientConfig, validator: Arc<dyn Validator>, serializer: Arc<dyn Serializer>) -> anyhow::Result<Client> {
        let socket = create_socket(&config);
        Self::with_socket(config, socket, validator, serializer)
    }

    /// a client with a JSON serializer and the default handshake
    pub fn with_defaults(config: ClientConfig) -> anyhow::Result<Client> {
        Self::new(config, Arc::new(DefaultValidator), Arc::new(JsonSerializer))
    }

    /// a client talking through a given socket adapter rather than the one for the configured
    ///  transport kind
    pub fn with_socket(
        config: ClientConfig,
        socket: Arc<dyn SocketAdapter>,
        validator: Arc<dyn Validator>,
        serializer: Arc<dyn Serializer>,
    ) -> anyhow::Result<Client> {
        config.validate()?;

        let events = Arc::new(ClientEventNotifier::new());
        let commander = Arc::new(Commander::new(config.clone(), socket, validator, serializer, events.clone()));
        Ok(Client {
            config: Arc::new(config),
            commander,
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Connects to the server, raising [ClientEvent::Connected] with the outcome. If a handshake
    ///  is configured, it is sent right away.
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        let connected = self.commander.connect(host, port).await;
        if connected {
            self.commander.start().await;
        }
        self.events.send_event(ClientEvent::Connected(connected));

        if connected {
            if let Some(handshake) = &self.config.handshake {
                info!("sending configured handshake");
                self.commander.handshake(Some(handshake.as_slice())).await;
            }
        }
        connected
    }

    pub async fn disconnect(&self) {
        self.commander.disconnect().await;
    }

    /// disconnects, after which the client can not connect again
    pub async fn destroy(&self) {
        self.commander.destroy().await;
    }

    pub fn is_connected(&self) -> bool {
        self.commander.is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.commander.session_state()
    }

    pub async fn handshake(&self, data: Option<&[u8]>) {
        self.commander.handshake(data).await;
    }

    pub async fn command(&self, name: &str, data: impl Into<Bytes>) {
        self.commander.command(name, data.into()).await;
    }

    /// Returns the request's id, or 0 if it could not be sent. See [Commander::request].
    pub async fn request(&self, name: &str, data: impl Into<Bytes>, callback: impl FnOnce(&Payload) + Send + 'static) -> u32 {
        self.commander.request(name, data.into(), Box::new(callback)).await
    }

    pub async fn cancel_request(&self, id: u32) {
        self.commander.cancel_request(id).await;
    }

    pub async fn response(&self, request: &Payload, data: impl Into<Bytes>) {
        self.commander.response(request, data.into()).await;
    }

    pub async fn error(&self, request: &Payload, message: &str, data: impl Into<Bytes>) {
        self.commander.error(request, message, data.into()).await;
    }

    /// Subscribes to a command. The returned handle can be passed to [Client::off] to remove
    ///  this subscription only.
    pub async fn on(&self, name: &str, callback: impl Fn(&Payload) + Send + Sync + 'static) -> CommandCallback {
        let callback: CommandCallback = Arc::new(callback);
        self.commander.add_command(name, callback.clone()).await;
        callback
    }

    /// removes a single subscription, or all subscriptions for the command if `callback` is `None`
    pub async fn off(&self, name: &str, callback: Option<&CommandCallback>) {
        self.commander.cancel_command(name, callback).await;
    }

    /// Handles requests sent by the server. There is at most one handler per name, a second
    ///  registration is ignored and returns `false`.
    pub async fn on_request(&self, name: &str, callback: impl Fn(&Payload) + Send + Sync + 'static) -> bool {
        self.commander.add_on_request(name, Arc::new(callback)).await
    }

    pub async fn off_request(&self, name: &str) {
        self.commander.cancel_on_request(name).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::TransportKind;
    use crate::events::DisconnectReason;
    use crate::protocol::block::{Block, BlockType};
    use crate::test_util::settle;
    use crate::test_util::socket::ScriptedSocket;
    use crate::test_util::validator::AcceptingValidator;

    fn client(config: ClientConfig) -> (Arc<ScriptedSocket>, Client) {
        let socket = Arc::new(ScriptedSocket::new());
        let client = Client::with_socket(config, socket.clone(), Arc::new(AcceptingValidator), Arc::new(JsonSerializer)).unwrap();
        (socket, client)
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ClientConfig::new(TransportKind::Tcp);
        config.receive_buffer_size = 0;
        assert!(Client::with_defaults(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_refused() {
        let (socket, client) = client(ClientConfig::default());
        socket.set_refuse(true);
        let mut events = client.subscribe_events();

        assert!(!client.connect("localhost", 1234).await);
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Connected(false));
        assert!(!client.is_connected());
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_sends_configured_handshake() {
        let mut config = ClientConfig::default();
        config.handshake = Some(b"hello".to_vec());
        let (socket, client) = client(config);
        let mut events = client.subscribe_events();

        assert!(client.connect("localhost", 1234).await);
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Connected(true));
        assert_eq!(client.state(), SessionState::Handshake);
        assert_eq!(socket.take_sent_blocks(), vec![Block::new(BlockType::Handshake, &b"hello"[..])]);

        socket.push_block(BlockType::HandshakeAcknowledgement, b"");
        settle().await;
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Ready);
        assert_eq!(client.state(), SessionState::Work);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end() {
        let (socket, client) = client(ClientConfig::default());
        let mut events = client.subscribe_events();

        assert!(client.connect("localhost", 1234).await);
        assert_eq!(client.state(), SessionState::Start);
        client.handshake(Some(&b"h1"[..])).await;
        assert_eq!(client.state(), SessionState::Handshake);

        socket.push_block(BlockType::HandshakeAcknowledgement, b"accepted");
        settle().await;
        assert_eq!(client.state(), SessionState::Work);
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Connected(true));
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Ready);
        assert!(events.try_recv().is_err());

        let received = Arc::new(Mutex::new(None));
        let cloned = received.clone();
        let id = client.request("status", Bytes::new(), move |p: &Payload| *cloned.lock().unwrap() = Some(p.clone())).await;
        assert_eq!(id, 1);

        let response = Payload::response_to(&Payload::request("status", id, Bytes::new()), "", &b"ok"[..]);
        socket.push_block(BlockType::Data, &JsonSerializer.encode(&response).unwrap());
        settle().await;
        assert_eq!(received.lock().unwrap().as_ref().map(|p| p.data.clone()), Some(Bytes::from_static(b"ok")));

        let pings = Arc::new(Mutex::new(0));
        let cloned = pings.clone();
        let handle = client.on("ping", move |_: &Payload| *cloned.lock().unwrap() += 1).await;
        socket.push_block(BlockType::Data, &JsonSerializer.encode(&Payload::command("ping", Bytes::new())).unwrap());
        settle().await;
        client.off("ping", Some(&handle)).await;
        socket.push_block(BlockType::Data, &JsonSerializer.encode(&Payload::command("ping", Bytes::new())).unwrap());
        settle().await;
        assert_eq!(*pings.lock().unwrap(), 1);

        client.disconnect().await;
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Disconnected(DisconnectReason::Normal));
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy() {
        let (socket, client) = client(ClientConfig::default());
        assert!(client.connect("localhost", 1234).await);
        client.destroy().await;
        assert!(!client.is_connected());

        assert!(!client.connect("localhost", 1234).await);
        assert_eq!(socket.num_opened(), 1);
    }
}

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClientConfig, TIMEOUT_SWEEP_INTERVAL};
use crate::events::{ClientEvent, ClientEventNotifier, DisconnectReason};
use crate::protocol::block::{Block, BlockType};
use crate::protocol::session::{BlockHandler, Session, SessionState};
use crate::rpc::payload::{Payload, PayloadKind, Serializer};
use crate::rpc::pulse::Pulse;
use crate::rpc::registry::{CommandCallback, CommandSubscriptions, PendingRequest, PendingRequests, RequestCallback, ResponseCallback, ServerRequestSubscriptions};
use crate::rpc::validator::{Validator, ValidatorState};
use crate::transport::SocketAdapter;

/// the error of the response a request is completed with if the server does not answer in time
pub const TIMEOUT_ERROR: &str = "timeout";

/// The RPC layer of a connection: it correlates requests and responses, dispatches commands and
///  server requests to their subscribers, keeps the connection alive and drives the handshake.
///
/// All state is per connection. Callbacks are never invoked while a table lock is held, so they
///  can safely (un)subscribe - though anything async must be spawned.
pub struct Commander {
    config: ClientConfig,
    session: Arc<Session>,
    validator: Arc<dyn Validator>,
    serializer: Arc<dyn Serializer>,
    events: Arc<ClientEventNotifier>,

    counter: AtomicU32,
    pending_requests: Mutex<PendingRequests>,
    commands: RwLock<CommandSubscriptions>,
    server_requests: RwLock<ServerRequestSubscriptions>,
    pulse: Pulse,

    /// cancels the timers of the current connection
    timers: Mutex<Option<CancellationToken>>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
    disconnect_reason: AtomicU8,
}
impl Commander {
    pub fn new(
        config: ClientConfig,
        socket: Arc<dyn SocketAdapter>,
        validator: Arc<dyn Validator>,
        serializer: Arc<dyn Serializer>,
        events: Arc<ClientEventNotifier>,
    ) -> Commander {
        let session = Arc::new(Session::new(socket, config.max_block_body_len));
        Commander {
            config,
            session,
            validator,
            serializer,
            events,
            counter: AtomicU32::new(1),
            pending_requests: Default::default(),
            commands: Default::default(),
            server_requests: Default::default(),
            pulse: Pulse::new(),
            timers: Mutex::new(None),
            receive_loop: Mutex::new(None),
            disconnect_reason: AtomicU8::new(DisconnectReason::Normal.into()),
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn disconnect_reason(&self) -> DisconnectReason {
        DisconnectReason::try_from(self.disconnect_reason.load(Ordering::Acquire))
            .unwrap_or(DisconnectReason::Unknown)
    }

    fn set_disconnect_reason(&self, reason: DisconnectReason) {
        self.disconnect_reason.store(reason.into(), Ordering::Release);
    }

    /// Opens the connection. A previous connection is closed first (and its disconnect
    ///  notification raised). A failed attempt leaves subscriptions and pending requests as they
    ///  are.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self, host: &str, port: u16) -> bool {
        self.end_receive_loop().await;
        self.session.open(host, port).await
    }

    /// starts the receive loop and the timers for a freshly opened connection
    pub async fn start(self: &Arc<Self>) {
        self.set_disconnect_reason(DisconnectReason::Normal);
        self.pulse.reset();
        self.session.start().await;

        let token = CancellationToken::new();
        if let Some(previous) = self.timers.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let commander = self.clone();
        let receive_loop = tokio::spawn(async move {
            let session = commander.session.clone();
            session.run(commander.as_ref()).await;
        });
        *self.receive_loop.lock().await = Some(receive_loop);

        self.spawn_timeout_sweeper(token.clone());
        self.spawn_pulse(token);
        debug!("started");
    }

    fn spawn_timeout_sweeper(self: &Arc<Self>, token: CancellationToken) {
        let commander = self.clone();
        tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + TIMEOUT_SWEEP_INTERVAL, TIMEOUT_SWEEP_INTERVAL);
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => commander.check_timeouts().await,
                }
            }
            trace!("timeout sweeper stopped");
        });
    }

    fn spawn_pulse(self: &Arc<Self>, token: CancellationToken) {
        let commander = self.clone();
        let interval = self.config.pulse_interval;
        tokio::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + interval, interval);
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        if commander.pulse.check() {
                            trace!("no traffic from server, sending heartbeat");
                            commander.session.heartbeat().await;
                        }
                    }
                }
            }
            trace!("pulse stopped");
        });
    }

    async fn check_timeouts(&self) {
        let expired = self.pending_requests.lock().await
            .expired(Instant::now(), self.config.request_timeout);

        for (id, name) in expired {
            debug!("request #{} '{}' timed out", id, name);
            self.on_payload(Payload {
                kind: PayloadKind::Response,
                name,
                id,
                data: Bytes::new(),
                error: TIMEOUT_ERROR.to_string(),
            }).await;
        }
    }

    async fn send_payload(&self, payload: &Payload) {
        match self.serializer.encode(payload) {
            Ok(buf) => {
                debug!("sending {:?} '{}' #{}", payload.kind, payload.name, payload.id);
                self.session.send(&buf).await;
            }
            Err(e) => warn!("could not serialize {:?} '{}': {}", payload.kind, payload.name, e),
        }
    }

    /// fire-and-forget
    pub async fn command(&self, name: &str, data: Bytes) {
        self.send_payload(&Payload::command(name, data)).await;
    }

    /// Sends a request, returning its id. The callback is called exactly once: with the server's
    ///  response, or with a response with error [TIMEOUT_ERROR]. It is not called if the request
    ///  is canceled or the connection is closed first.
    ///
    /// Returns 0 if the request could not be sent, e.g. because there is no connection.
    pub async fn request(&self, name: &str, data: Bytes, callback: ResponseCallback) -> u32 {
        if self.session.state() == SessionState::Closed {
            warn!("not connected, rejecting request '{}'", name);
            return 0;
        }

        let id = self.counter.fetch_add(1, Ordering::AcqRel);
        if id == 0 {
            warn!("request id counter wrapped around, rejecting request '{}'", name);
            return 0;
        }

        let payload = Payload::request(name, id, data);
        let buf = match self.serializer.encode(&payload) {
            Ok(buf) => buf,
            Err(e) => {
                warn!("could not serialize request '{}': {}", name, e);
                return 0;
            }
        };

        let is_new = self.pending_requests.lock().await.insert(PendingRequest {
            id,
            name: name.to_string(),
            callback,
            issued_at: Instant::now(),
        });
        if !is_new {
            warn!("request id #{} is still pending, rejecting request '{}'", id, name);
            return 0;
        }

        debug!("sending request '{}' #{}", name, id);
        self.session.send(&buf).await;
        id
    }

    pub async fn cancel_request(&self, id: u32) {
        if self.pending_requests.lock().await.remove(id).is_none() {
            warn!("cancel: no pending request #{}", id);
        }
    }

    pub async fn is_pending(&self, id: u32) -> bool {
        self.pending_requests.lock().await.contains(id)
    }

    /// answers a request sent by the server
    pub async fn response(&self, request: &Payload, data: Bytes) {
        self.send_payload(&Payload::response_to(request, "", data)).await;
    }

    /// answers a request sent by the server with an error
    pub async fn error(&self, request: &Payload, error: &str, data: Bytes) {
        self.send_payload(&Payload::response_to(request, error, data)).await;
    }

    pub async fn add_command(&self, name: &str, callback: CommandCallback) {
        self.commands.write().await.add(name, callback);
    }

    /// removes the given callback, or all callbacks for the command if `callback` is `None`
    pub async fn cancel_command(&self, name: &str, callback: Option<&CommandCallback>) {
        if !self.commands.write().await.remove(name, callback) {
            debug!("no subscription to remove for command '{}'", name);
        }
    }

    /// returns `false` if there is a handler for the name already, which is kept
    pub async fn add_on_request(&self, name: &str, callback: RequestCallback) -> bool {
        self.server_requests.write().await.add(name, callback)
    }

    pub async fn cancel_on_request(&self, name: &str) {
        if !self.server_requests.write().await.remove(name) {
            debug!("no handler to remove for server request '{}'", name);
        }
    }

    pub async fn handshake(&self, data: Option<&[u8]>) {
        let body = self.validator.handshake(data);
        self.session.handshake(&body).await;
    }

    /// Closes the connection, waiting until its disconnect notification was raised.
    pub async fn disconnect(&self) {
        self.end_receive_loop().await;
        self.clear().await;
    }

    async fn end_receive_loop(&self) {
        let receive_loop = self.receive_loop.lock().await.take();
        self.session.disconnect().await;
        if let Some(receive_loop) = receive_loop {
            if let Err(e) = receive_loop.await {
                error!("receive loop failed: {}", e);
            }
        }
    }

    /// stops the timers and drops all subscriptions and pending requests
    pub async fn clear(&self) {
        if let Some(timers) = self.timers.lock().await.take() {
            timers.cancel();
        }
        self.pending_requests.lock().await.clear();
        self.commands.write().await.clear();
        self.server_requests.write().await.clear();
        self.pulse.reset();
    }

    /// closes the connection for good
    pub async fn destroy(&self) {
        self.end_receive_loop().await;
        self.clear().await;
        self.session.destroy().await;
    }

    /// handles a payload received from the server, or a synthesized timeout response
    async fn on_payload(&self, payload: Payload) {
        self.pulse.reset();
        self.session.heartbeat().await;
        self.dispatch_payload(payload).await;
    }

    async fn dispatch_payload(&self, payload: Payload) {
        trace!("dispatching {:?} '{}' #{}", payload.kind, payload.name, payload.id);

        match payload.kind {
            PayloadKind::Command => {
                let subscribers = self.commands.read().await.subscribers(&payload.name);
                if subscribers.is_empty() {
                    warn!("no subscriber for command '{}'", payload.name);
                }
                for callback in subscribers {
                    invoke_callback("command", &payload.name, || callback(&payload));
                }
            }
            PayloadKind::Request => {
                let handler = self.server_requests.read().await.get(&payload.name);
                match handler {
                    Some(callback) => invoke_callback("request", &payload.name, || callback(&payload)),
                    None => warn!("no handler for server request '{}'", payload.name),
                }
            }
            PayloadKind::Response => {
                let pending = self.pending_requests.lock().await.remove(payload.id);
                match pending {
                    Some(pending) => invoke_callback("response", &pending.name, || (pending.callback)(&payload)),
                    None => warn!("unknown callback: no pending request #{} ('{}')", payload.id, payload.name),
                }
            }
        }
    }

    async fn on_acknowledgement(&self, body: &[u8]) {
        self.pulse.reset();
        if self.validator.verify_acknowledgement(body) == ValidatorState::Failure {
            warn!("handshake acknowledgement was rejected");
            self.reject_handshake().await;
            return;
        }

        match self.validator.acknowledgement(body) {
            Ok(acknowledgement) => {
                if self.session.acknowledge(&acknowledgement).await {
                    info!("handshake complete");
                    self.events.send_event(ClientEvent::Ready);
                }
            }
            Err(e) => {
                warn!("could not create handshake acknowledgement: {}", e);
                self.reject_handshake().await;
            }
        }
    }

    async fn reject_handshake(&self) {
        self.set_disconnect_reason(DisconnectReason::Handshake);
        self.session.disconnect().await;
    }
}

fn invoke_callback(kind: &str, name: &str, callback: impl FnOnce()) {
    if let Err(e) = catch_unwind(AssertUnwindSafe(callback)) {
        error!("{} callback for '{}' panicked: {}", kind, name, panic_message(e.as_ref()));
    }
}

fn panic_message(e: &(dyn Any + Send)) -> &str {
    if let Some(s) = e.downcast_ref::<&str>() {
        s
    }
    else if let Some(s) = e.downcast_ref::<String>() {
        s.as_str()
    }
    else {
        "?"
    }
}

#[async_trait]
impl BlockHandler for Commander {
    async fn on_block(&self, block: Block) {
        match block.block_type {
            BlockType::Heartbeat => self.pulse.reset(),
            BlockType::Kick => {
                let reason = DisconnectReason::from_kick_body(&block.body);
                info!("kicked by server: {:?}", reason);
                self.set_disconnect_reason(reason);
                self.pulse.reset();
            }
            BlockType::HandshakeAcknowledgement => self.on_acknowledgement(&block.body).await,
            BlockType::Data => match self.serializer.decode(&block.body) {
                Ok(payload) => self.on_payload(payload).await,
                Err(e) => warn!("dropping payload that could not be decoded: {}", e),
            },
            BlockType::Handshake => warn!("unexpected handshake block from server"),
        }
    }

    async fn on_disconnect(&self) {
        self.clear().await;
        let reason = self.disconnect_reason();
        info!("disconnected: {:?}", reason);
        self.events.send_event(ClientEvent::Disconnected(reason));
    }
}

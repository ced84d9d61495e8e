//! Home Assistant WebSocket API client
//!
//! Each server gets one [`WebSocketRepository`]. The socket itself is owned by
//! a background task (`ConnectionActor`); callers talk to it over an mpsc
//! command channel and get replies through oneshot channels keyed by the
//! message id. Subscriptions receive their events on a dedicated channel and
//! unsubscribe when the returned stream is dropped.
//!
//! The connection is opened lazily on first use. When it drops while
//! subscriptions are still consumed, the actor reconnects after a delay
//! (doubling up to a cap) and subscribes again on the same channels. Without
//! live subscriptions it exits, and the next call opens a fresh connection.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, Stream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{RealtimeApi, RealtimeApiProvider};
use crate::errors::{HomelinkError, Result};
use crate::models::{PushMessage, Server};
use crate::platform::DeviceState;
use crate::services::server_registry::ServerRegistry;
use crate::utils::truncate_message;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);
const COMMAND_BUFFER: usize = 32;

pub const PUSH_NOTIFICATION_CHANNEL: &str = "mobile_app/push_notification_channel";
pub const PUSH_NOTIFICATION_CONFIRM: &str = "mobile_app/push_notification_confirm";

enum Command {
    Request {
        payload: Map<String, Value>,
        reply: oneshot::Sender<Value>,
    },
    Subscribe {
        payload: Map<String, Value>,
        events: mpsc::UnboundedSender<Value>,
        reply: oneshot::Sender<Result<u64>>,
    },
    /// Keyed by the id the subscription was first confirmed under
    Unsubscribe { subscription: u64 },
}

enum Pending {
    Reply(oneshot::Sender<Value>),
    Subscribe {
        payload: Map<String, Value>,
        events: mpsc::UnboundedSender<Value>,
        reply: oneshot::Sender<Result<u64>>,
    },
    Resubscribe { key: u64 },
}

/// A confirmed subscription. `id` is the server-side id on the current
/// socket, `None` while a re-subscription is unconfirmed.
struct Subscription {
    id: Option<u64>,
    payload: Map<String, Value>,
    events: mpsc::UnboundedSender<Value>,
}

enum SessionEnd {
    /// Every handle is gone
    Released,
    /// The socket closed or failed
    Lost,
}

/// Drop replies nobody waits for any more. Returns how many were removed.
fn forget_abandoned(pending: &mut HashMap<u64, Pending>) -> usize {
    let before = pending.len();
    pending.retain(|_, entry| match entry {
        Pending::Reply(reply) => !reply.is_closed(),
        Pending::Subscribe { reply, .. } => !reply.is_closed(),
        Pending::Resubscribe { .. } => true,
    });
    before - pending.len()
}

/// `{"type": kind}` ready for extra fields
fn message(kind: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("type".to_string(), json!(kind));
    payload
}

fn is_success(response: &Value) -> bool {
    response.get("success").and_then(Value::as_bool) == Some(true)
}

fn error_text(response: &Value) -> String {
    response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string()
}

/// Opens authenticated sockets to one server
#[derive(Clone)]
struct Connector {
    server_id: u32,
    registry: Arc<dyn ServerRegistry>,
    device: Arc<dyn DeviceState>,
}

impl Connector {
    async fn server(&self) -> Result<Server> {
        self.registry
            .get_server(self.server_id)
            .await
            .ok_or_else(|| HomelinkError::Config(format!("No server found for id {}", self.server_id)))
    }

    async fn open(&self) -> Result<Socket> {
        let server = self.server().await?;
        let token = server.access_token.clone().ok_or_else(|| {
            HomelinkError::Auth(format!("Server {} has no access token", self.server_id))
        })?;
        let internal = server.is_internal(self.device.as_ref()).await;
        let url = Server::websocket_url(server.url_for(internal))?;

        log::info!("server {}: connecting to {}", self.server_id, url);
        let (mut socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                HomelinkError::NetworkUnreachable(format!(
                    "Connection to {} timed out after {}s",
                    url,
                    CONNECT_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| HomelinkError::NetworkUnreachable(format!("Connection to {} failed: {}", url, e)))?;

        let version = authenticate(&mut socket, &token).await?;
        log::info!(
            "server {}: authenticated (Home Assistant {})",
            self.server_id,
            version.as_deref().unwrap_or("unknown version")
        );
        Ok(socket)
    }
}

/// Owns the socket of one server and survives reconnects
struct ConnectionActor {
    server_id: u32,
    connector: Connector,
    reconnect_delay: Duration,
    socket: Socket,
    commands: mpsc::Receiver<Command>,
    next_id: u64,
    pending: HashMap<u64, Pending>,
    subscriptions: HashMap<u64, Subscription>,
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            let end = self.serve().await;
            // Replies can never arrive on another socket
            self.pending.clear();
            match end {
                SessionEnd::Released => break,
                SessionEnd::Lost => {
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }

        // Dropping the senders ends every subscription stream
        self.subscriptions.clear();
        log::debug!("server {}: connection task finished", self.server_id);
    }

    async fn serve(&mut self) -> SessionEnd {
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        log::debug!("server {}: no more handles, closing connection", self.server_id);
                        let _ = self.socket.close(None).await;
                        return SessionEnd::Released;
                    };
                    if let Err(e) = self.handle_command(command).await {
                        log::warn!("server {}: failed to send on websocket: {}", self.server_id, e);
                        return SessionEnd::Lost;
                    }
                }
                incoming = self.socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("server {}: websocket closed by server: {:?}", self.server_id, frame);
                            return SessionEnd::Lost;
                        }
                        // tungstenite answers pings itself
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            log::warn!("server {}: websocket read error: {}", self.server_id, e);
                            return SessionEnd::Lost;
                        }
                        None => {
                            log::info!("server {}: websocket stream ended", self.server_id);
                            return SessionEnd::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Open a new socket and subscribe again while anyone still consumes
    /// events. Returns false once there is nothing left to keep alive.
    async fn reconnect(&mut self) -> bool {
        let mut delay = self.reconnect_delay;
        loop {
            self.subscriptions.retain(|_, sub| !sub.events.is_closed());
            if self.subscriptions.is_empty() {
                log::debug!("server {}: no live subscriptions, not reconnecting", self.server_id);
                return false;
            }
            for sub in self.subscriptions.values_mut() {
                sub.id = None;
            }

            log::info!(
                "server {}: reconnecting in {:?} to restore {} subscription(s)",
                self.server_id,
                delay,
                self.subscriptions.len()
            );
            if !self.wait_offline(delay).await {
                return false;
            }

            match self.connector.open().await {
                Ok(socket) => {
                    self.socket = socket;
                    match self.resubscribe().await {
                        Ok(()) => return true,
                        Err(e) => {
                            log::warn!("server {}: re-subscribing failed: {}", self.server_id, e);
                            self.pending.clear();
                        }
                    }
                }
                Err(e) => log::warn!("server {}: reconnect failed: {}", self.server_id, e),
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
    }

    /// Sleep for `delay` while failing requests that arrive in the meantime
    async fn wait_offline(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    None => return false,
                    // Dropping the reply tells the caller the connection is down
                    Some(Command::Request { .. }) | Some(Command::Subscribe { .. }) => {}
                    Some(Command::Unsubscribe { subscription }) => {
                        self.subscriptions.remove(&subscription);
                        if self.subscriptions.is_empty() {
                            return false;
                        }
                    }
                },
            }
        }
    }

    async fn resubscribe(&mut self) -> Result<()> {
        let keys: Vec<u64> = self.subscriptions.keys().copied().collect();
        for key in keys {
            let Some(payload) = self.subscriptions.get(&key).map(|sub| sub.payload.clone()) else {
                continue;
            };
            let id = self.send(payload).await?;
            self.pending.insert(id, Pending::Resubscribe { key });
        }
        Ok(())
    }

    async fn send(&mut self, mut payload: Map<String, Value>) -> Result<u64> {
        self.next_id += 1;
        let id = self.next_id;
        payload.insert("id".to_string(), json!(id));
        self.socket
            .send(Message::Text(Value::Object(payload).to_string()))
            .await?;
        Ok(id)
    }

    async fn handle_command(&mut self, command: Command) -> Result<()> {
        let forgotten = forget_abandoned(&mut self.pending);
        if forgotten > 0 {
            log::debug!("server {}: forgot {} unanswered request(s)", self.server_id, forgotten);
        }

        match command {
            Command::Request { payload, reply } => {
                let id = self.send(payload).await?;
                self.pending.insert(id, Pending::Reply(reply));
            }
            Command::Subscribe {
                payload,
                events,
                reply,
            } => {
                let id = self.send(payload.clone()).await?;
                self.pending.insert(
                    id,
                    Pending::Subscribe {
                        payload,
                        events,
                        reply,
                    },
                );
            }
            Command::Unsubscribe { subscription } => {
                if let Some(sub) = self.subscriptions.remove(&subscription) {
                    if let Some(id) = sub.id {
                        self.unsubscribe(id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, id: u64) -> Result<()> {
        log::debug!("server {}: unsubscribing from subscription {}", self.server_id, id);
        let mut payload = message("unsubscribe_events");
        payload.insert("subscription".to_string(), json!(id));
        self.send(payload).await?;
        Ok(())
    }

    /// Unsubscribe, logging instead of failing the session
    async fn release(&mut self, id: u64) {
        if let Err(e) = self.unsubscribe(id).await {
            log::debug!("server {}: unsubscribe failed: {}", self.server_id, e);
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "server {}: unparsable frame ({}): {}",
                    self.server_id,
                    e,
                    truncate_message(text, 140)
                );
                return;
            }
        };

        // Servers may coalesce several messages into one array frame
        let messages = match parsed {
            Value::Array(items) => items,
            other => vec![other],
        };

        for message in messages {
            self.dispatch(message).await;
        }
    }

    fn subscription_key(&self, id: u64) -> Option<u64> {
        self.subscriptions
            .iter()
            .find(|(_, sub)| sub.id == Some(id))
            .map(|(key, _)| *key)
    }

    async fn dispatch(&mut self, message: Value) {
        let id = message.get("id").and_then(Value::as_u64);
        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match (kind.as_str(), id) {
            ("event", Some(id)) => {
                let Some(key) = self.subscription_key(id) else {
                    log::trace!("server {}: event for unknown subscription {}", self.server_id, id);
                    return;
                };
                let event = message.get("event").cloned().unwrap_or(Value::Null);
                let delivered = self
                    .subscriptions
                    .get(&key)
                    .is_some_and(|sub| sub.events.send(event).is_ok());
                if !delivered {
                    self.subscriptions.remove(&key);
                    self.release(id).await;
                }
            }
            ("result" | "pong", Some(id)) => self.handle_response(id, message).await,
            _ => log::debug!("server {}: unhandled message type '{}'", self.server_id, kind),
        }
    }

    async fn handle_response(&mut self, id: u64, message: Value) {
        match self.pending.remove(&id) {
            Some(Pending::Reply(reply)) => {
                let _ = reply.send(message);
            }
            Some(Pending::Subscribe {
                payload,
                events,
                reply,
            }) => {
                if !is_success(&message) {
                    let _ = reply.send(Err(HomelinkError::Remote(format!(
                        "Subscription refused: {}",
                        error_text(&message)
                    ))));
                } else if reply.send(Ok(id)).is_ok() {
                    self.subscriptions.insert(
                        id,
                        Subscription {
                            id: Some(id),
                            payload,
                            events,
                        },
                    );
                } else {
                    // The caller gave up waiting
                    self.release(id).await;
                }
            }
            Some(Pending::Resubscribe { key }) => {
                let restored = is_success(&message);
                match (self.subscriptions.contains_key(&key), restored) {
                    (true, true) => {
                        if let Some(sub) = self.subscriptions.get_mut(&key) {
                            sub.id = Some(id);
                        }
                        log::debug!(
                            "server {}: subscription {} restored as {}",
                            self.server_id,
                            key,
                            id
                        );
                    }
                    (true, false) => {
                        log::error!(
                            "server {}: unable to restore subscription {}: {}",
                            self.server_id,
                            key,
                            error_text(&message)
                        );
                        self.subscriptions.remove(&key);
                    }
                    // Consumer left while the subscription was being restored
                    (false, true) => self.release(id).await,
                    (false, false) => {}
                }
            }
            None => log::trace!("server {}: response for unknown id {}", self.server_id, id),
        }
    }
}

/// Run the `auth_required` / `auth` / `auth_ok` exchange. Returns the
/// server version when announced.
async fn authenticate(socket: &mut Socket, access_token: &str) -> Result<Option<String>> {
    loop {
        let frame = tokio::time::timeout(CONNECT_TIMEOUT, socket.next())
            .await
            .map_err(|_| HomelinkError::Remote("Timed out waiting for authentication".to_string()))?;

        match frame {
            Some(Ok(Message::Text(text))) => {
                let msg: Value = serde_json::from_str(&text)?;
                match msg.get("type").and_then(Value::as_str) {
                    Some("auth_required") => {
                        let auth = json!({"type": "auth", "access_token": access_token});
                        socket.send(Message::Text(auth.to_string())).await?;
                    }
                    Some("auth_ok") => {
                        return Ok(msg
                            .get("ha_version")
                            .and_then(Value::as_str)
                            .map(str::to_string));
                    }
                    Some("auth_invalid") => {
                        let reason = msg
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("invalid credentials");
                        return Err(HomelinkError::Auth(reason.to_string()));
                    }
                    other => log::debug!("ignoring {:?} before authentication", other),
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(HomelinkError::Remote(
                    "Connection closed during authentication".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Events of one subscription; unsubscribes on drop
struct SubscriptionStream {
    events: mpsc::UnboundedReceiver<Value>,
    subscription: u64,
    commands: mpsc::Sender<Command>,
}

impl Stream for SubscriptionStream {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        let _ = self.commands.try_send(Command::Unsubscribe {
            subscription: self.subscription,
        });
    }
}

/// WebSocket API access for one server
pub struct WebSocketRepository {
    server_id: u32,
    connector: Connector,
    reconnect_delay: Duration,
    connection: Mutex<Option<mpsc::Sender<Command>>>,
}

impl WebSocketRepository {
    pub fn new(
        server_id: u32,
        registry: Arc<dyn ServerRegistry>,
        device: Arc<dyn DeviceState>,
    ) -> Self {
        Self {
            server_id,
            connector: Connector {
                server_id,
                registry,
                device,
            },
            reconnect_delay: RECONNECT_DELAY,
            connection: Mutex::new(None),
        }
    }

    /// First wait before reconnecting a dropped socket; doubles per failed attempt
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Whether an authenticated connection is currently open
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Drop our handle; the socket closes once live subscriptions end too
    pub async fn shutdown(&self) {
        self.connection.lock().await.take();
    }

    async fn server(&self) -> Result<Server> {
        self.connector.server().await
    }

    async fn connection(&self) -> Result<mpsc::Sender<Command>> {
        let mut guard = self.connection.lock().await;
        if let Some(tx) = guard.as_ref() {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }

        let tx = self.connect().await?;
        *guard = Some(tx.clone());
        Ok(tx)
    }

    async fn connect(&self) -> Result<mpsc::Sender<Command>> {
        let socket = self.connector.open().await?;
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = ConnectionActor {
            server_id: self.server_id,
            connector: self.connector.clone(),
            reconnect_delay: self.reconnect_delay,
            socket,
            commands: rx,
            next_id: 0,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
        };
        tokio::spawn(actor.run());
        Ok(tx)
    }

    /// Send a command and wait for its `result`/`pong`
    async fn request(&self, payload: Map<String, Value>) -> Result<Value> {
        let tx = self.connection().await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Request {
            payload,
            reply: reply_tx,
        })
        .await
        .map_err(|_| HomelinkError::Remote("Connection closed".to_string()))?;

        tokio::time::timeout(RESPONSE_TIMEOUT, reply_rx)
            .await
            .map_err(|_| HomelinkError::Remote("Timed out waiting for response".to_string()))?
            .map_err(|_| HomelinkError::Remote("Connection closed before response".to_string()))
    }
}

#[async_trait]
impl RealtimeApi for WebSocketRepository {
    async fn notifications(&self) -> Option<BoxStream<'static, PushMessage>> {
        let server = match self.server().await {
            Ok(server) => server,
            Err(e) => {
                log::warn!("server {}: {}", self.server_id, e);
                return None;
            }
        };
        let Some(webhook_id) = server.webhook_id.clone() else {
            log::warn!(
                "server {}: no webhook_id configured, cannot subscribe to notifications",
                self.server_id
            );
            return None;
        };

        let commands = match self.connection().await {
            Ok(tx) => tx,
            Err(e) => {
                log::warn!("server {}: unable to connect: {}", self.server_id, e);
                return None;
            }
        };

        let mut payload = message(PUSH_NOTIFICATION_CHANNEL);
        payload.insert("webhook_id".to_string(), json!(webhook_id));
        payload.insert("support_confirm".to_string(), json!(true));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = oneshot::channel();
        if commands
            .send(Command::Subscribe {
                payload,
                events: events_tx,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            log::warn!("server {}: connection closed before subscribing", self.server_id);
            return None;
        }

        let subscription = match tokio::time::timeout(SUBSCRIBE_TIMEOUT, reply_rx).await {
            Ok(Ok(Ok(id))) => id,
            Ok(Ok(Err(e))) => {
                log::error!("server {}: unable to subscribe: {}", self.server_id, e);
                return None;
            }
            Ok(Err(_)) => {
                log::warn!("server {}: connection closed while subscribing", self.server_id);
                return None;
            }
            Err(_) => {
                log::warn!("server {}: subscription request timed out", self.server_id);
                return None;
            }
        };

        log::debug!(
            "server {}: subscribed to push notifications (subscription {})",
            self.server_id,
            subscription
        );

        let stream = SubscriptionStream {
            events: events_rx,
            subscription,
            commands,
        };
        Some(stream.map(PushMessage::from_value).boxed())
    }

    async fn ack_notification(&self, confirm_id: &str) -> Result<bool> {
        let server = self.server().await?;
        let webhook_id = server.webhook_id.ok_or_else(|| {
            HomelinkError::TransientAck(format!("Server {} has no webhook_id", self.server_id))
        })?;

        let mut payload = message(PUSH_NOTIFICATION_CONFIRM);
        payload.insert("webhook_id".to_string(), json!(webhook_id));
        payload.insert("confirm_id".to_string(), json!(confirm_id));

        let response = self
            .request(payload)
            .await
            .map_err(|e| HomelinkError::TransientAck(e.to_string()))?;
        Ok(is_success(&response))
    }

    async fn send_ping(&self) -> bool {
        match self.request(message("ping")).await {
            Ok(response) => response.get("type").and_then(Value::as_str) == Some("pong"),
            Err(e) => {
                log::debug!("server {}: ping failed: {}", self.server_id, e);
                false
            }
        }
    }
}

/// Caches one [`WebSocketRepository`] per server id
pub struct WebSocketRepositoryProvider {
    registry: Arc<dyn ServerRegistry>,
    device: Arc<dyn DeviceState>,
    repositories: Mutex<HashMap<u32, Arc<WebSocketRepository>>>,
}

impl WebSocketRepositoryProvider {
    pub fn new(registry: Arc<dyn ServerRegistry>, device: Arc<dyn DeviceState>) -> Self {
        Self {
            registry,
            device,
            repositories: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RealtimeApiProvider for WebSocketRepositoryProvider {
    async fn api_for(&self, server_id: u32) -> Result<Arc<dyn RealtimeApi>> {
        if self.registry.get_server(server_id).await.is_none() {
            if let Some(stale) = self.repositories.lock().await.remove(&server_id) {
                stale.shutdown().await;
            }
            return Err(HomelinkError::Config(format!(
                "No server found for id {}",
                server_id
            )));
        }

        let mut repositories = self.repositories.lock().await;
        let repository = repositories
            .entry(server_id)
            .or_insert_with(|| {
                Arc::new(WebSocketRepository::new(
                    server_id,
                    self.registry.clone(),
                    self.device.clone(),
                ))
            })
            .clone();
        Ok(repository)
    }
}

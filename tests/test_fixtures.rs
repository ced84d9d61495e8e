//! Test fixtures and mock collaborators for homelink testing
//!
//! Shared by the integration test files via `mod test_fixtures;`.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use homelink::errors::{HomelinkError, Result};
use homelink::models::{CheckResult, MessageKey, PushMessage, Server, WebsocketSetting};
use homelink::platform::DeviceState;
use homelink::remote::{RealtimeApi, RealtimeApiProvider};
use homelink::services::{
    ConnectivityChecker, ForegroundDenied, ForegroundGuard, ForegroundHost, NotificationSink,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A server that has finished registration
pub fn registered_server(id: u32, setting: WebsocketSetting) -> Server {
    let mut server = Server::new(id, format!("https://ha{}.example.com", id));
    server.name = format!("Server {}", id);
    server.webhook_id = Some(format!("webhook-{}", id));
    server.access_token = Some(format!("token-{}", id));
    server.websocket_setting = setting;
    server
}

/// Device whose conditions tests can flip at will
pub struct MockDevice {
    connected: AtomicBool,
    interactive: AtomicBool,
    ethernet: AtomicBool,
    vpn: AtomicBool,
    ssid: Mutex<Option<String>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            interactive: AtomicBool::new(true),
            ethernet: AtomicBool::new(false),
            vpn: AtomicBool::new(false),
            ssid: Mutex::new(None),
        }
    }
}

impl MockDevice {
    pub fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::SeqCst);
    }

    pub fn set_interactive(&self, value: bool) {
        self.interactive.store(value, Ordering::SeqCst);
    }

    pub fn set_ethernet(&self, value: bool) {
        self.ethernet.store(value, Ordering::SeqCst);
    }

    pub fn set_vpn(&self, value: bool) {
        self.vpn.store(value, Ordering::SeqCst);
    }

    pub fn set_ssid(&self, ssid: Option<&str>) {
        *self.ssid.lock().unwrap() = ssid.map(str::to_string);
    }
}

#[async_trait]
impl DeviceState for MockDevice {
    async fn has_active_connection(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::SeqCst)
    }

    async fn is_using_ethernet(&self) -> bool {
        self.ethernet.load(Ordering::SeqCst)
    }

    async fn is_using_vpn(&self) -> bool {
        self.vpn.load(Ordering::SeqCst)
    }

    async fn current_ssid(&self) -> Option<String> {
        self.ssid.lock().unwrap().clone()
    }
}

/// Realtime API that records calls. Each subscription gets its own channel;
/// tests push messages into the latest one.
pub struct MockApi {
    pub pings: AtomicUsize,
    pub subscriptions: AtomicUsize,
    pub acks: Mutex<Vec<String>>,
    failing_acks: Mutex<HashSet<String>>,
    refuse_subscription: AtomicBool,
    senders: Mutex<Vec<mpsc::UnboundedSender<PushMessage>>>,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            pings: AtomicUsize::new(0),
            subscriptions: AtomicUsize::new(0),
            acks: Mutex::new(Vec::new()),
            failing_acks: Mutex::new(HashSet::new()),
            refuse_subscription: AtomicBool::new(false),
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl MockApi {
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }

    pub fn fail_ack(&self, confirm_id: &str) {
        self.failing_acks.lock().unwrap().insert(confirm_id.to_string());
    }

    pub fn refuse_subscriptions(&self) {
        self.refuse_subscription.store(true, Ordering::SeqCst);
    }

    /// Deliver a message on the most recent subscription
    pub fn push(&self, message: PushMessage) -> bool {
        self.senders
            .lock()
            .unwrap()
            .last()
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    /// Number of subscriptions whose stream is still held by a consumer
    pub fn open_streams(&self) -> usize {
        self.senders
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl RealtimeApi for MockApi {
    async fn notifications(&self) -> Option<BoxStream<'static, PushMessage>> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        if self.refuse_subscription.load(Ordering::SeqCst) {
            return None;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().push(tx);
        Some(
            stream::unfold(rx, |mut rx| async move {
                let message = rx.recv().await?;
                Some((message, rx))
            })
            .boxed(),
        )
    }

    async fn ack_notification(&self, confirm_id: &str) -> Result<bool> {
        self.acks.lock().unwrap().push(confirm_id.to_string());
        if self.failing_acks.lock().unwrap().contains(confirm_id) {
            return Err(HomelinkError::TransientAck(format!(
                "server went away while confirming {}",
                confirm_id
            )));
        }
        Ok(true)
    }

    async fn send_ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Hands out one [`MockApi`] per known server id
#[derive(Default)]
pub struct MockApiProvider {
    apis: Mutex<HashMap<u32, Arc<MockApi>>>,
}

impl MockApiProvider {
    pub fn api(&self, server_id: u32) -> Arc<MockApi> {
        self.apis
            .lock()
            .unwrap()
            .entry(server_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl RealtimeApiProvider for MockApiProvider {
    async fn api_for(&self, server_id: u32) -> Result<Arc<dyn RealtimeApi>> {
        Ok(self.api(server_id))
    }
}

/// Sink that keeps everything it is handed
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<(HashMap<String, String>, String)>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<(HashMap<String, String>, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn handle_message(&self, data: HashMap<String, String>, source: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((data, source.to_string()));
    }
}

/// Foreground host that grants or denies on demand
#[derive(Default)]
pub struct MockForeground {
    deny: AtomicBool,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    pub notices: Mutex<Vec<String>>,
}

impl MockForeground {
    pub fn denying() -> Self {
        let host = Self::default();
        host.deny.store(true, Ordering::SeqCst);
        host
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForegroundHost for MockForeground {
    async fn acquire(&self) -> std::result::Result<ForegroundGuard, ForegroundDenied> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(ForegroundDenied {
                reason: "background activity restricted".to_string(),
            });
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = self.released.clone();
        Ok(ForegroundGuard::new(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn post_restricted_notice(&self, reason: &str) {
        self.notices.lock().unwrap().push(reason.to_string());
    }
}

/// Checker returning scripted results and recording every call
pub struct MockChecker {
    pub dns: CheckResult,
    pub port: CheckResult,
    pub tls: CheckResult,
    pub server: CheckResult,
    pub home_assistant: CheckResult,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockChecker {
    fn default() -> Self {
        Self {
            dns: CheckResult::success_with(MessageKey::Dns, "192.0.2.1"),
            port: CheckResult::success_with(MessageKey::Port, "443"),
            tls: CheckResult::success(MessageKey::TlsSuccess),
            server: CheckResult::success(MessageKey::ServerSuccess),
            home_assistant: CheckResult::success(MessageKey::HomeAssistantSuccess),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockChecker {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ConnectivityChecker for MockChecker {
    async fn dns(&self, host: &str) -> CheckResult {
        self.record(format!("dns({})", host));
        self.dns.clone()
    }

    async fn port(&self, host: &str, port: u16) -> CheckResult {
        self.record(format!("port({}, {})", host, port));
        self.port.clone()
    }

    async fn tls(&self, url: &str) -> CheckResult {
        self.record(format!("tls({})", url));
        self.tls.clone()
    }

    async fn server(&self, url: &str) -> CheckResult {
        self.record(format!("server({})", url));
        self.server.clone()
    }

    async fn home_assistant(&self, url: &str) -> CheckResult {
        self.record(format!("home_assistant({})", url));
        self.home_assistant.clone()
    }
}

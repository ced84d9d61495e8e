//! Liveness worker behaviour under a paused clock

mod test_fixtures;

use homelink::models::{PushMessage, WebsocketSetting};
use homelink::services::{
    Eligibility, LivenessWorker, MemoryServerRegistry, WorkOutcome, WorkerSettings,
};
use std::sync::Arc;
use std::time::Duration;
use test_fixtures::{
    MockApiProvider, MockDevice, MockForeground, RecordingSink, registered_server,
};
use tokio::sync::watch;

struct Harness {
    registry: Arc<MemoryServerRegistry>,
    device: Arc<MockDevice>,
    apis: Arc<MockApiProvider>,
    sink: Arc<RecordingSink>,
    foreground: Arc<MockForeground>,
    worker: Arc<LivenessWorker>,
}

impl Harness {
    fn new(servers: Vec<homelink::models::Server>) -> Self {
        Self::with_foreground(servers, MockForeground::default())
    }

    fn with_foreground(servers: Vec<homelink::models::Server>, foreground: MockForeground) -> Self {
        let registry = Arc::new(MemoryServerRegistry::new(servers));
        let device = Arc::new(MockDevice::default());
        let apis = Arc::new(MockApiProvider::default());
        let sink = Arc::new(RecordingSink::default());
        let foreground = Arc::new(foreground);
        let worker = Arc::new(
            LivenessWorker::new(
                registry.clone(),
                device.clone(),
                apis.clone(),
                sink.clone(),
                foreground.clone(),
            )
            .with_settings(WorkerSettings {
                tick: Duration::from_secs(30),
                ping_timeout: Duration::from_secs(5),
            }),
        );
        Self {
            registry,
            device,
            apis,
            sink,
            foreground,
            worker,
        }
    }

    /// Start `do_work` in the background
    fn spawn(
        &self,
    ) -> (
        watch::Sender<bool>,
        tokio::task::JoinHandle<homelink::errors::Result<WorkOutcome>>,
    ) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = self.worker.clone();
        let handle = tokio::spawn(async move { worker.do_work(stop_rx).await });
        (stop_tx, handle)
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_never_setting_is_not_eligible() {
    let harness = Harness::new(vec![registered_server(1, WebsocketSetting::Never)]);

    assert_eq!(harness.worker.evaluate(1).await, Eligibility::SettingNever);
    let (_stop, handle) = harness.spawn();
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::NotEligible);
    assert_eq!(harness.foreground.acquired(), 0);
    assert_eq!(harness.apis.api(1).subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_eligibility_rules_in_order() {
    let mut unregistered = registered_server(2, WebsocketSetting::Always);
    unregistered.access_token = None;
    let harness = Harness::new(vec![unregistered]);

    assert_eq!(harness.worker.evaluate(2).await, Eligibility::NotRegistered);
    assert_eq!(harness.worker.evaluate(99).await, Eligibility::UnknownServer);

    harness.device.set_connected(false);
    assert_eq!(harness.worker.evaluate(2).await, Eligibility::NoNetwork);
    assert!(!harness.worker.should_run().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_ping_on_every_tick() {
    let harness = Harness::new(vec![registered_server(1, WebsocketSetting::Always)]);
    let (stop, handle) = harness.spawn();

    settle().await;
    let api = harness.apis.api(1);
    assert_eq!(api.subscriptions(), 1);
    assert_eq!(api.pings(), 0);
    assert_eq!(harness.foreground.acquired(), 1);

    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(api.pings(), 3);
    assert_eq!(api.subscriptions(), 1);

    stop.send(true).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Finished);
    assert_eq!(harness.foreground.released(), 1);
    settle().await;
    assert_eq!(api.open_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_pings_each_existing_job_once() {
    let harness = Harness::new(vec![
        registered_server(1, WebsocketSetting::Always),
        registered_server(2, WebsocketSetting::Always),
    ]);
    let (stop, handle) = harness.spawn();
    settle().await;

    let first = harness.apis.api(1);
    let second = harness.apis.api(2);
    for api in [&first, &second] {
        assert_eq!(api.subscriptions(), 1);
        assert_eq!(api.pings(), 0);
    }

    tokio::time::sleep(Duration::from_secs(31)).await;
    for api in [&first, &second] {
        assert_eq!(api.pings(), 1);
        assert_eq!(api.subscriptions(), 1);
        assert_eq!(api.open_streams(), 1);
    }

    stop.send(true).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_screen_on_follows_display() {
    let harness = Harness::new(vec![
        registered_server(1, WebsocketSetting::Always),
        registered_server(2, WebsocketSetting::ScreenOn),
    ]);
    let (stop, handle) = harness.spawn();
    settle().await;

    let always = harness.apis.api(1);
    let screen_on = harness.apis.api(2);
    assert_eq!(screen_on.subscriptions(), 1);

    harness.device.set_interactive(false);
    assert_eq!(harness.worker.evaluate(2).await, Eligibility::ScreenOff);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(screen_on.open_streams(), 0);
    assert_eq!(screen_on.pings(), 0);
    assert_eq!(always.pings(), 1);

    harness.device.set_interactive(true);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(screen_on.subscriptions(), 2);
    assert_eq!(screen_on.open_streams(), 1);
    assert_eq!(always.subscriptions(), 1);

    stop.send(true).unwrap();
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_home_wifi_stops_when_leaving_home() {
    let mut server = registered_server(1, WebsocketSetting::HomeWifi);
    server.internal_ssids = vec!["home".to_string()];
    let harness = Harness::new(vec![server]);

    harness.device.set_ssid(Some("cafe"));
    assert_eq!(harness.worker.evaluate(1).await, Eligibility::AwayFromHome);

    harness.device.set_ssid(Some("home"));
    let (_stop, handle) = harness.spawn();
    settle().await;
    assert_eq!(harness.apis.api(1).subscriptions(), 1);

    harness.device.set_ssid(Some("cafe"));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(handle.is_finished());
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Finished);
    settle().await;
    assert_eq!(harness.apis.api(1).open_streams(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_home_wifi_accepts_ethernet_and_vpn() {
    let mut server = registered_server(1, WebsocketSetting::HomeWifi);
    server.internal_ethernet = true;
    server.internal_vpn = true;
    let harness = Harness::new(vec![server]);

    assert_eq!(harness.worker.evaluate(1).await, Eligibility::AwayFromHome);
    harness.device.set_vpn(true);
    assert!(harness.worker.should_run_for_server(1).await);
    harness.device.set_vpn(false);
    harness.device.set_ethernet(true);
    assert!(harness.worker.should_run_for_server(1).await);
}

#[tokio::test(start_paused = true)]
async fn test_removed_server_loses_its_job() {
    let harness = Harness::new(vec![
        registered_server(1, WebsocketSetting::Always),
        registered_server(2, WebsocketSetting::Always),
    ]);
    let (stop, handle) = harness.spawn();
    settle().await;
    assert_eq!(harness.apis.api(2).open_streams(), 1);

    harness
        .registry
        .set_servers(vec![registered_server(1, WebsocketSetting::Always)])
        .await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(harness.apis.api(2).open_streams(), 0);
    assert_eq!(harness.apis.api(1).open_streams(), 1);

    stop.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_restricted_foreground_posts_notice() {
    let harness = Harness::with_foreground(
        vec![registered_server(1, WebsocketSetting::Always)],
        MockForeground::denying(),
    );

    let (_stop, handle) = harness.spawn();
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Restricted);
    assert_eq!(harness.foreground.notices().len(), 1);
    assert_eq!(harness.apis.api(1).subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_ack_does_not_stop_delivery() {
    let harness = Harness::new(vec![registered_server(1, WebsocketSetting::Always)]);
    let (stop, handle) = harness.spawn();
    settle().await;

    let api = harness.apis.api(1);
    api.fail_ack("c1");

    let first = PushMessage::from_value(serde_json::json!({
        "message": "Front door opened",
        "hass_confirm_id": "c1",
    }));
    let second = PushMessage::from_value(serde_json::json!({
        "message": "Garage closed",
        "title": "Garage",
        "hass_confirm_id": "c2",
        "data": {"actions": [{"action": "OPEN", "title": "Open"}]},
    }));
    assert!(api.push(first));
    assert!(api.push(second));
    settle().await;

    assert_eq!(api.acks(), vec!["c1".to_string(), "c2".to_string()]);
    let messages = harness.sink.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|(_, source)| source == "Websocket"));

    let (last, _) = &messages[1];
    assert_eq!(last.get("message").map(String::as_str), Some("Garage closed"));
    assert_eq!(last.get("action_1_key").map(String::as_str), Some("OPEN"));
    assert_eq!(last.get("webhook_id").map(String::as_str), Some("webhook-1"));

    stop.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_work_ends_when_no_job_survives() {
    let harness = Harness::new(vec![registered_server(1, WebsocketSetting::Always)]);
    harness.apis.api(1).refuse_subscriptions();

    let (_stop, handle) = harness.spawn();
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(handle.is_finished());
    assert_eq!(handle.await.unwrap().unwrap(), WorkOutcome::Finished);
    assert_eq!(harness.apis.api(1).subscriptions(), 1);
    assert_eq!(harness.foreground.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_stop_sender_keeps_working() {
    let harness = Harness::new(vec![registered_server(1, WebsocketSetting::Always)]);
    let (stop, handle) = harness.spawn();
    drop(stop);

    tokio::time::sleep(Duration::from_secs(65)).await;
    assert!(!handle.is_finished());
    assert_eq!(harness.apis.api(1).pings(), 2);
    handle.abort();
}

//! Connection liveness worker
//!
//! Keeps one notification subscription open per eligible server. The worker
//! task owns a [`JobTable`] mapping server ids to spawned subscription jobs
//! and re-evaluates it on every tick: ineligible or removed servers lose
//! their job, remaining jobs get a keepalive ping, and newly eligible
//! servers get a job started.

use futures_util::StreamExt;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::foreground::ForegroundHost;
use super::notification_sink::NotificationSink;
use super::scheduler::{PeriodicScheduler, liveness_work_policy};
use super::server_registry::ServerRegistry;
use crate::config::WorkerConfig;
use crate::errors::Result;
use crate::models::{Server, WebsocketSetting};
use crate::platform::DeviceState;
use crate::remote::{RealtimeApi, RealtimeApiProvider};

/// Source tag attached to every delivered notification
pub const NOTIFICATION_SOURCE: &str = "Websocket";
/// Unique name of the periodic work
pub const WORK_NAME: &str = "websocket";

/// Why a server does or does not get a persistent connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    UnknownServer,
    SettingNever,
    NoNetwork,
    NotRegistered,
    ScreenOff,
    AwayFromHome,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Eligibility::Eligible => "eligible",
            Eligibility::UnknownServer => "server no longer exists",
            Eligibility::SettingNever => "connection setting is never",
            Eligibility::NoNetwork => "no network connection",
            Eligibility::NotRegistered => "no registered server",
            Eligibility::ScreenOff => "display is off",
            Eligibility::AwayFromHome => "not on the home network",
        }
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// How a `do_work` cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// No server qualified, nothing was started
    NotEligible,
    /// Foreground execution was denied and the user was notified
    Restricted,
    /// Jobs ran and have all been stopped
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub tick: Duration,
    pub ping_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&WorkerConfig> for WorkerSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            tick: config.tick(),
            ping_timeout: config.ping_timeout(),
        }
    }
}

struct Job {
    handle: JoinHandle<()>,
    api: Arc<dyn RealtimeApi>,
}

/// Per-server jobs; at most one entry per server id. Dropping the table
/// aborts every job.
#[derive(Default)]
struct JobTable {
    jobs: HashMap<u32, Job>,
}

impl JobTable {
    fn any_alive(&self) -> bool {
        self.jobs.values().any(|job| !job.handle.is_finished())
    }

    fn contains(&self, server_id: u32) -> bool {
        self.jobs.contains_key(&server_id)
    }

    fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.jobs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn insert(&mut self, server_id: u32, job: Job) {
        if let Some(previous) = self.jobs.insert(server_id, job) {
            previous.handle.abort();
        }
    }

    fn cancel(&mut self, server_id: u32) {
        if let Some(job) = self.jobs.remove(&server_id) {
            job.handle.abort();
        }
    }

    /// Drop entries whose task already ended
    fn reap_finished(&mut self) -> Vec<u32> {
        let finished: Vec<u32> = self
            .jobs
            .iter()
            .filter(|(_, job)| job.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            self.jobs.remove(id);
        }
        finished
    }

    fn apis(&self) -> Vec<(u32, Arc<dyn RealtimeApi>)> {
        self.jobs
            .iter()
            .map(|(id, job)| (*id, job.api.clone()))
            .collect()
    }

    fn clear(&mut self) {
        for (_, job) in self.jobs.drain() {
            job.handle.abort();
        }
    }
}

impl Drop for JobTable {
    fn drop(&mut self) {
        self.clear();
    }
}

pub struct LivenessWorker {
    registry: Arc<dyn ServerRegistry>,
    device: Arc<dyn DeviceState>,
    apis: Arc<dyn RealtimeApiProvider>,
    sink: Arc<dyn NotificationSink>,
    foreground: Arc<dyn ForegroundHost>,
    settings: WorkerSettings,
}

impl LivenessWorker {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        device: Arc<dyn DeviceState>,
        apis: Arc<dyn RealtimeApiProvider>,
        sink: Arc<dyn NotificationSink>,
        foreground: Arc<dyn ForegroundHost>,
    ) -> Self {
        Self {
            registry,
            device,
            apis,
            sink,
            foreground,
            settings: WorkerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Eligibility of one server, rules checked in a fixed order
    pub async fn evaluate(&self, server_id: u32) -> Eligibility {
        match self.registry.get_server(server_id).await {
            Some(server) => self.evaluate_server(&server).await,
            None => Eligibility::UnknownServer,
        }
    }

    async fn evaluate_server(&self, server: &Server) -> Eligibility {
        if server.websocket_setting == WebsocketSetting::Never {
            return Eligibility::SettingNever;
        }
        if !self.device.has_active_connection().await {
            return Eligibility::NoNetwork;
        }
        if !self.registry.is_registered().await {
            return Eligibility::NotRegistered;
        }
        match server.websocket_setting {
            WebsocketSetting::ScreenOn if !self.device.is_interactive().await => {
                Eligibility::ScreenOff
            }
            WebsocketSetting::HomeWifi if !server.is_internal(self.device.as_ref()).await => {
                Eligibility::AwayFromHome
            }
            _ => Eligibility::Eligible,
        }
    }

    pub async fn should_run_for_server(&self, server_id: u32) -> bool {
        self.evaluate(server_id).await.is_eligible()
    }

    /// Whether at least one registered server qualifies
    pub async fn should_run(&self) -> Result<bool> {
        for server in self.registry.default_servers().await? {
            if self.evaluate_server(&server).await.is_eligible() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// One scheduled invocation. Runs until no job is alive, `stop` turns
    /// true, no server qualifies any more, or re-evaluation fails.
    pub async fn do_work(&self, mut stop: watch::Receiver<bool>) -> Result<WorkOutcome> {
        if !self.should_run().await? {
            log::debug!("No server needs a persistent connection");
            return Ok(WorkOutcome::NotEligible);
        }

        let _foreground = match self.foreground.acquire().await {
            Ok(guard) => guard,
            Err(denied) => {
                log::warn!("Unable to keep connections open: {}", denied);
                self.foreground.post_restricted_notice(&denied.reason).await;
                return Ok(WorkOutcome::Restricted);
            }
        };

        let mut jobs = JobTable::default();
        self.manage_server_jobs(&mut jobs).await?;

        while jobs.any_alive() && !*stop.borrow() {
            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick) => {}
                _ = stopped(&mut stop) => {
                    log::info!("Liveness work cancelled");
                    break;
                }
            }

            // A tick with no live job ends the work; otherwise dead jobs are
            // restarted below
            if !jobs.any_alive() {
                log::info!("No active notification jobs, ending work");
                break;
            }

            match self.should_run().await {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("No server qualifies any more, ending work");
                    break;
                }
                Err(e) => {
                    log::warn!("Unable to re-evaluate servers: {}", e);
                    break;
                }
            }

            if let Err(e) = self.manage_server_jobs(&mut jobs).await {
                log::warn!("Unable to manage server jobs: {}", e);
                break;
            }
        }

        jobs.clear();
        Ok(WorkOutcome::Finished)
    }

    /// Cancel stale jobs, ping the rest, start missing ones
    async fn manage_server_jobs(&self, jobs: &mut JobTable) -> Result<()> {
        let servers = self.registry.default_servers().await?;

        for id in jobs.reap_finished() {
            log::debug!("server {}: notification job ended", id);
        }

        for id in jobs.ids() {
            let eligibility = match servers.iter().find(|s| s.id == id) {
                Some(server) => self.evaluate_server(server).await,
                None => Eligibility::UnknownServer,
            };
            if !eligibility.is_eligible() {
                log::info!("server {}: stopping notification job ({})", id, eligibility);
                jobs.cancel(id);
            }
        }

        let ping_timeout = self.settings.ping_timeout;
        let pings = jobs.apis().into_iter().map(|(id, api)| async move {
            (id, tokio::time::timeout(ping_timeout, api.send_ping()).await)
        });
        for (id, result) in join_all(pings).await {
            match result {
                Ok(true) => log::trace!("server {}: pong", id),
                Ok(false) => log::warn!("server {}: keepalive ping failed", id),
                Err(_) => log::warn!(
                    "server {}: keepalive ping timed out after {:?}",
                    id,
                    ping_timeout
                ),
            }
        }

        for server in &servers {
            if jobs.contains(server.id) {
                continue;
            }
            let eligibility = self.evaluate_server(server).await;
            if !eligibility.is_eligible() {
                log::trace!("server {}: not starting job ({})", server.id, eligibility);
                continue;
            }

            let api = match self.apis.api_for(server.id).await {
                Ok(api) => api,
                Err(e) => {
                    log::warn!("server {}: no realtime api: {}", server.id, e);
                    continue;
                }
            };

            log::info!("server {}: starting notification job", server.id);
            let handle = tokio::spawn(collect_notifications(
                server.id,
                server.webhook_id.clone(),
                api.clone(),
                self.sink.clone(),
            ));
            jobs.insert(server.id, Job { handle, api });
        }

        Ok(())
    }
}

/// Resolves once `stop` holds `true`. A dropped sender never cancels.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Body of one server job: deliver every pushed message, acknowledging
/// those that ask for it.
pub async fn collect_notifications(
    server_id: u32,
    webhook_id: Option<String>,
    api: Arc<dyn RealtimeApi>,
    sink: Arc<dyn NotificationSink>,
) {
    let Some(mut messages) = api.notifications().await else {
        log::warn!("server {}: unable to subscribe to notifications", server_id);
        return;
    };
    log::info!("server {}: listening for notifications", server_id);

    while let Some(message) = messages.next().await {
        if let Some(confirm_id) = &message.confirm_id {
            match api.ack_notification(confirm_id).await {
                Ok(true) => log::debug!("server {}: confirmed {}", server_id, confirm_id),
                Ok(false) => log::warn!(
                    "server {}: confirmation of {} was refused",
                    server_id,
                    confirm_id
                ),
                Err(e) => log::error!(
                    "server {}: unable to confirm received notification: {}",
                    server_id,
                    e
                ),
            }
        }

        let flattened = message.flatten(webhook_id.as_deref());
        sink.handle_message(flattened, NOTIFICATION_SOURCE).await;
    }

    log::info!("server {}: notification stream ended", server_id);
}

/// Schedule `do_work` every `period`, replacing idle or finished work and
/// keeping a run in progress.
pub fn start_liveness_work(
    scheduler: &PeriodicScheduler,
    worker: Arc<LivenessWorker>,
    period: Duration,
    stop: watch::Receiver<bool>,
) -> bool {
    let policy = liveness_work_policy(scheduler.work_state(WORK_NAME));
    log::debug!("Scheduling liveness work every {:?} ({:?})", period, policy);

    scheduler.enqueue_unique_periodic(WORK_NAME, policy, period, move || {
        let worker = worker.clone();
        let stop = stop.clone();
        async move {
            match worker.do_work(stop).await {
                Ok(outcome) => log::debug!("Liveness work finished: {:?}", outcome),
                Err(e) if e.is_transient() => log::warn!("Liveness work interrupted: {}", e),
                Err(e) => log::error!("Liveness work failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = WorkerConfig {
            tick_secs: 10,
            ping_timeout_secs: 2,
            ..WorkerConfig::default()
        };
        let settings = WorkerSettings::from(&config);
        assert_eq!(settings.tick, Duration::from_secs(10));
        assert_eq!(settings.ping_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_job_table_reaps_finished() {
        struct Idle;

        #[async_trait::async_trait]
        impl RealtimeApi for Idle {
            async fn notifications(
                &self,
            ) -> Option<futures_util::stream::BoxStream<'static, crate::models::PushMessage>> {
                None
            }
            async fn ack_notification(&self, _confirm_id: &str) -> Result<bool> {
                Ok(true)
            }
            async fn send_ping(&self) -> bool {
                true
            }
        }

        let mut table = JobTable::default();
        table.insert(
            1,
            Job {
                handle: tokio::spawn(async {}),
                api: Arc::new(Idle),
            },
        );
        table.insert(
            2,
            Job {
                handle: tokio::spawn(std::future::pending::<()>()),
                api: Arc::new(Idle),
            },
        );

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(table.reap_finished(), vec![1]);
        assert!(table.any_alive());
        assert_eq!(table.ids(), vec![2]);

        table.cancel(2);
        assert!(!table.any_alive());
    }

    #[test]
    fn test_eligibility_reasons() {
        assert!(Eligibility::Eligible.is_eligible());
        assert!(!Eligibility::ScreenOff.is_eligible());
        assert_eq!(Eligibility::AwayFromHome.to_string(), "not on the home network");
    }
}

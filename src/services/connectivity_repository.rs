//! Sequential connectivity diagnostics for a server URL
//!
//! [`ConnectivityCheckRepository::run_checks`] walks DNS, port, TLS, server
//! and Home Assistant checks in order and yields a full
//! [`ConnectivityCheckState`] snapshot after every transition. The pipeline
//! is a small state machine driven by `stream::unfold`; dropping the stream
//! drops whatever check is in flight.

use futures_util::stream::{self, Stream};
use std::sync::Arc;
use url::{Host, Url};

use super::connectivity_checker::ConnectivityChecker;
use crate::models::{CheckResult, ConnectivityCheckState, MessageKey, Stage};

/// Stages skipped when DNS fails
const AFTER_DNS: [Stage; 4] = [Stage::Port, Stage::Tls, Stage::Server, Stage::HomeAssistant];
/// Stages skipped when the server is unreachable
const AFTER_SERVER: [Stage; 1] = [Stage::HomeAssistant];

/// Parsed pieces of the URL under test
#[derive(Debug, Clone, PartialEq, Eq)]
struct CheckTarget {
    /// Exactly as given, handed to the URL based checks
    url: String,
    host: String,
    port: u16,
    https: bool,
}

impl CheckTarget {
    /// `None` unless the URL parses, is http(s) and names a host
    fn parse(url: &str) -> Option<Self> {
        let parsed = Url::parse(url.trim()).ok()?;
        let https = match parsed.scheme() {
            "https" => true,
            "http" => false,
            _ => return None,
        };
        let host = match parsed.host()? {
            Host::Domain(domain) if !domain.is_empty() => domain.to_string(),
            Host::Domain(_) => return None,
            Host::Ipv4(addr) => addr.to_string(),
            Host::Ipv6(addr) => addr.to_string(),
        };
        let port = parsed.port_or_known_default()?;

        Some(Self {
            url: url.to_string(),
            host,
            port,
            https,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,
    InvalidUrl,
    Begin(Stage),
    Finish(Stage),
    Done,
}

struct Pipeline {
    checker: Arc<dyn ConnectivityChecker>,
    target: Option<CheckTarget>,
    state: ConnectivityCheckState,
    step: Step,
}

impl Pipeline {
    /// Perform the current step and return the snapshot it produced
    async fn advance(&mut self) -> Option<ConnectivityCheckState> {
        let (state, next) = match self.step {
            Step::Done => return None,
            Step::Start => {
                let next = match &self.target {
                    Some(_) => Step::Begin(Stage::Dns),
                    None => Step::InvalidUrl,
                };
                (self.state.clone(), next)
            }
            Step::InvalidUrl => {
                let state = self
                    .state
                    .with(Stage::Dns, CheckResult::failure(MessageKey::ErrorInvalidUrl))
                    .with_skipped(&AFTER_DNS);
                (state, Step::Done)
            }
            Step::Begin(Stage::Tls) if !self.is_https() => {
                (self.state.with(Stage::Tls, CheckResult::NotApplicable), Step::Begin(Stage::Server))
            }
            Step::Begin(stage) => (self.state.with(stage, CheckResult::InProgress), Step::Finish(stage)),
            Step::Finish(stage) => {
                let result = self.run_stage(stage).await;
                let skipped: &[Stage] = match stage {
                    Stage::Dns if result.is_failure() => &AFTER_DNS,
                    Stage::Server if result.is_failure() => &AFTER_SERVER,
                    _ => &[],
                };
                let state = self.state.with(stage, result).with_skipped(skipped);
                let next = match (skipped.is_empty(), stage.next()) {
                    (true, Some(stage)) => Step::Begin(stage),
                    _ => Step::Done,
                };
                (state, next)
            }
        };

        self.state = state.clone();
        self.step = next;
        Some(state)
    }

    fn is_https(&self) -> bool {
        self.target.as_ref().is_some_and(|t| t.https)
    }

    async fn run_stage(&self, stage: Stage) -> CheckResult {
        let Some(target) = &self.target else {
            return CheckResult::failure(MessageKey::ErrorInvalidUrl);
        };

        log::debug!("Running {} check for {}", stage.label(), target.url);
        let result = match stage {
            Stage::Dns => self.checker.dns(&target.host).await,
            Stage::Port => self.checker.port(&target.host, target.port).await,
            Stage::Tls => self.checker.tls(&target.url).await,
            Stage::Server => self.checker.server(&target.url).await,
            Stage::HomeAssistant => self.checker.home_assistant(&target.url).await,
        };
        log::debug!("{} check: {:?}", stage.label(), result);
        result
    }
}

/// Runs the diagnostic pipeline against a [`ConnectivityChecker`]
#[derive(Clone)]
pub struct ConnectivityCheckRepository {
    checker: Arc<dyn ConnectivityChecker>,
}

impl ConnectivityCheckRepository {
    pub fn new(checker: Arc<dyn ConnectivityChecker>) -> Self {
        Self { checker }
    }

    /// Snapshots of the check state, starting with all stages pending.
    ///
    /// An unusable URL yields exactly two snapshots and never reaches the
    /// checker. Plain http marks TLS not applicable without running it.
    pub fn run_checks(&self, url: &str) -> impl Stream<Item = ConnectivityCheckState> + Send + 'static {
        let target = CheckTarget::parse(url);
        if target.is_none() {
            log::debug!("'{}' is not a usable server URL", url);
        }

        let pipeline = Pipeline {
            checker: self.checker.clone(),
            target,
            state: ConnectivityCheckState::default(),
            step: Step::Start,
        };

        stream::unfold(pipeline, |mut pipeline| async move {
            let state = pipeline.advance().await?;
            Some((state, pipeline))
        })
    }
}

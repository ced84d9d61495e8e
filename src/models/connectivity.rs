//! Connectivity diagnostic results

use serde::Serialize;
use std::fmt;

/// Broad class of a failed check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureCategory {
    InvalidInput,
    NetworkUnreachable,
    Skipped,
}

/// Displayable label or failure reason for a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageKey {
    Dns,
    Port,
    TlsSuccess,
    ServerSuccess,
    HomeAssistantSuccess,
    ErrorInvalidUrl,
    ErrorDns,
    ErrorPort,
    ErrorTls,
    ErrorServer,
    ErrorNotHomeAssistant,
    ErrorTimeout,
    Skipped,
}

impl MessageKey {
    /// Stable key a front end can translate
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKey::Dns => "connection_check_dns",
            MessageKey::Port => "connection_check_port",
            MessageKey::TlsSuccess => "connection_check_tls_success",
            MessageKey::ServerSuccess => "connection_check_server_success",
            MessageKey::HomeAssistantSuccess => "connection_check_home_assistant_success",
            MessageKey::ErrorInvalidUrl => "connection_check_error_invalid_url",
            MessageKey::ErrorDns => "connection_check_error_dns",
            MessageKey::ErrorPort => "connection_check_error_port",
            MessageKey::ErrorTls => "connection_check_error_tls",
            MessageKey::ErrorServer => "connection_check_error_server",
            MessageKey::ErrorNotHomeAssistant => "connection_check_error_not_home_assistant",
            MessageKey::ErrorTimeout => "connection_check_error_timeout",
            MessageKey::Skipped => "connection_check_skipped",
        }
    }

    /// English text for terminal output
    pub fn describe(&self) -> &'static str {
        match self {
            MessageKey::Dns => "Hostname resolved",
            MessageKey::Port => "Port is reachable",
            MessageKey::TlsSuccess => "TLS certificate is valid",
            MessageKey::ServerSuccess => "Server responded",
            MessageKey::HomeAssistantSuccess => "Server is Home Assistant",
            MessageKey::ErrorInvalidUrl => "The URL is not valid",
            MessageKey::ErrorDns => "Hostname could not be resolved",
            MessageKey::ErrorPort => "Port is not reachable",
            MessageKey::ErrorTls => "TLS handshake failed or certificate is not trusted",
            MessageKey::ErrorServer => "Server did not respond",
            MessageKey::ErrorNotHomeAssistant => "Server does not look like Home Assistant",
            MessageKey::ErrorTimeout => "Check timed out",
            MessageKey::Skipped => "Skipped because an earlier check failed",
        }
    }

    /// Category for failure keys, `None` for success labels
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            MessageKey::ErrorInvalidUrl => Some(FailureCategory::InvalidInput),
            MessageKey::Skipped => Some(FailureCategory::Skipped),
            MessageKey::ErrorDns
            | MessageKey::ErrorPort
            | MessageKey::ErrorTls
            | MessageKey::ErrorServer
            | MessageKey::ErrorNotHomeAssistant
            | MessageKey::ErrorTimeout => Some(FailureCategory::NetworkUnreachable),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one diagnostic stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckResult {
    Pending,
    InProgress,
    Success {
        message: MessageKey,
        details: Option<String>,
    },
    Failure {
        reason: MessageKey,
    },
    NotApplicable,
}

impl CheckResult {
    pub fn success(message: MessageKey) -> Self {
        CheckResult::Success {
            message,
            details: None,
        }
    }

    pub fn success_with(message: MessageKey, details: impl Into<String>) -> Self {
        CheckResult::Success {
            message,
            details: Some(details.into()),
        }
    }

    pub fn failure(reason: MessageKey) -> Self {
        CheckResult::Failure { reason }
    }

    pub fn skipped() -> Self {
        CheckResult::Failure {
            reason: MessageKey::Skipped,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CheckResult::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckResult::Success { .. })
    }

    /// Still waiting or running
    pub fn is_open(&self) -> bool {
        matches!(self, CheckResult::Pending | CheckResult::InProgress)
    }

    pub fn failure_reason(&self) -> Option<MessageKey> {
        match self {
            CheckResult::Failure { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// The five diagnostic stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Dns,
    Port,
    Tls,
    Server,
    HomeAssistant,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Dns,
        Stage::Port,
        Stage::Tls,
        Stage::Server,
        Stage::HomeAssistant,
    ];

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Dns => Some(Stage::Port),
            Stage::Port => Some(Stage::Tls),
            Stage::Tls => Some(Stage::Server),
            Stage::Server => Some(Stage::HomeAssistant),
            Stage::HomeAssistant => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Dns => "DNS resolution",
            Stage::Port => "Port reachability",
            Stage::Tls => "TLS certificate",
            Stage::Server => "Server connection",
            Stage::HomeAssistant => "Home Assistant verification",
        }
    }
}

/// Snapshot of all five stages. Never mutated in place: every update
/// produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityCheckState {
    pub dns_resolution: CheckResult,
    pub port_reachability: CheckResult,
    pub tls_certificate: CheckResult,
    pub server_connection: CheckResult,
    pub home_assistant_verification: CheckResult,
}

impl Default for ConnectivityCheckState {
    fn default() -> Self {
        Self {
            dns_resolution: CheckResult::Pending,
            port_reachability: CheckResult::Pending,
            tls_certificate: CheckResult::Pending,
            server_connection: CheckResult::Pending,
            home_assistant_verification: CheckResult::Pending,
        }
    }
}

impl ConnectivityCheckState {
    pub fn get(&self, stage: Stage) -> &CheckResult {
        match stage {
            Stage::Dns => &self.dns_resolution,
            Stage::Port => &self.port_reachability,
            Stage::Tls => &self.tls_certificate,
            Stage::Server => &self.server_connection,
            Stage::HomeAssistant => &self.home_assistant_verification,
        }
    }

    /// Copy with one stage replaced
    pub fn with(&self, stage: Stage, result: CheckResult) -> Self {
        let mut next = self.clone();
        match stage {
            Stage::Dns => next.dns_resolution = result,
            Stage::Port => next.port_reachability = result,
            Stage::Tls => next.tls_certificate = result,
            Stage::Server => next.server_connection = result,
            Stage::HomeAssistant => next.home_assistant_verification = result,
        }
        next
    }

    /// Copy with every listed stage marked as skipped
    pub fn with_skipped(&self, stages: &[Stage]) -> Self {
        stages
            .iter()
            .fold(self.clone(), |state, stage| state.with(*stage, CheckResult::skipped()))
    }

    pub fn is_complete(&self) -> bool {
        Stage::ALL.iter().all(|stage| !self.get(*stage).is_open())
    }

    pub fn has_failure(&self) -> bool {
        Stage::ALL.iter().any(|stage| self.get(*stage).is_failure())
    }
}

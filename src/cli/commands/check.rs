//! Check command implementation

use anyhow::{Result, bail};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use super::load_config;
use crate::cli::args::Cli;
use crate::models::{CheckResult, ConnectivityCheckState, Stage};
use crate::services::{ConnectivityCheckRepository, DefaultConnectivityChecker};
use crate::utils::logging::init_cli_logging;

pub async fn execute_check_command(
    cli: &Cli,
    url: &str,
    timeout: Option<u64>,
    json: bool,
) -> Result<()> {
    init_cli_logging(cli.verbose, cli.quiet)?;

    let config = load_config(cli)?;
    let timeout = timeout
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.diagnostics.timeout());

    let checker = DefaultConnectivityChecker::new(timeout)?;
    let repository = ConnectivityCheckRepository::new(Arc::new(checker));

    if !json {
        println!("Checking {} (timeout {}s per check)", url, timeout.as_secs());
    }

    let mut states = Box::pin(repository.run_checks(url));
    let mut previous: Option<ConnectivityCheckState> = None;
    while let Some(state) = states.next().await {
        if json {
            println!("{}", serde_json::to_string(&state)?);
        } else {
            print_transitions(previous.as_ref(), &state);
        }
        previous = Some(state);
    }

    let Some(last) = previous else {
        bail!("The check produced no result");
    };

    if !json {
        println!();
        print_summary(&last);
    }

    if last.has_failure() {
        bail!("{} is not reachable", url);
    }
    Ok(())
}

fn print_transitions(previous: Option<&ConnectivityCheckState>, state: &ConnectivityCheckState) {
    for stage in Stage::ALL {
        let result = state.get(stage);
        if previous.map(|p| p.get(stage)) == Some(result) || *result == CheckResult::Pending {
            continue;
        }
        println!("  {:<28} {}", stage.label(), describe(result));
    }
}

fn print_summary(state: &ConnectivityCheckState) {
    println!("Summary:");
    for stage in Stage::ALL {
        println!("  {} {:<28} {}", marker(state.get(stage)), stage.label(), describe(state.get(stage)));
    }
}

fn marker(result: &CheckResult) -> &'static str {
    match result {
        CheckResult::Success { .. } => "✓",
        CheckResult::Failure { .. } => "✗",
        CheckResult::NotApplicable => "-",
        CheckResult::Pending | CheckResult::InProgress => "…",
    }
}

fn describe(result: &CheckResult) -> String {
    match result {
        CheckResult::Pending => "pending".to_string(),
        CheckResult::InProgress => "checking…".to_string(),
        CheckResult::Success {
            message,
            details: Some(details),
        } => format!("{} ({})", message.describe(), details),
        CheckResult::Success { message, .. } => message.describe().to_string(),
        CheckResult::Failure { reason } => reason.describe().to_string(),
        CheckResult::NotApplicable => "not applicable (plain http)".to_string(),
    }
}

//! Logging utilities and initialization for homelink

use anyhow::Result;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;
use std::path::Path;

/// Map `-v`/`-q` flags onto a level filter
pub fn level_from_flags(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Parse a configured level name, falling back to `Info`
pub fn parse_level(name: &str) -> LevelFilter {
    name.parse().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', using info", name);
        LevelFilter::Info
    })
}

/// Initialize logging for one-shot CLI commands
pub fn init_cli_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_from_flags(verbose, quiet);

    Builder::from_default_env()
        .target(Target::Stderr)
        .filter_level(level)
        .format_timestamp_secs()
        .format_module_path(false)
        .try_init()?;

    #[cfg(debug_assertions)]
    log_panics::init();

    log::debug!("homelink logging initialized with level: {:?}", level);
    Ok(())
}

/// Initialize logging for the long-running listener
pub fn init_daemon_logging(
    structured: bool,
    log_file: Option<&Path>,
    level: Option<LevelFilter>,
) -> Result<()> {
    let level = level.unwrap_or(LevelFilter::Info);

    if structured {
        init_json_logger(level, log_file)?;
    } else {
        init_human_readable_logger(level, log_file)?;
    }

    // Always initialize panic logging for the listener
    log_panics::init();

    log::info!("homelink listener logging initialized with level: {:?}", level);
    Ok(())
}

fn open_target(log_file: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    use std::fs::OpenOptions;

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Box::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            ))
        }
        None => Ok(Box::new(std::io::stdout())),
    }
}

/// JSON lines, one object per record
fn init_json_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    use chrono::Utc;

    Builder::from_default_env()
        .target(Target::Pipe(open_target(log_file)?))
        .filter_level(level)
        .format(|buf, record| {
            let json = serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "module": record.module_path().unwrap_or("unknown"),
                "message": record.args().to_string(),
                "target": record.target(),
            });
            writeln!(buf, "{}", json)
        })
        .try_init()?;

    Ok(())
}

fn init_human_readable_logger(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    Builder::from_default_env()
        .target(Target::Pipe(open_target(log_file)?))
        .filter_level(level)
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                buf.timestamp(),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_selection() {
        assert_eq!(level_from_flags(0, true), LevelFilter::Error);
        assert_eq!(level_from_flags(3, true), LevelFilter::Error);
        assert_eq!(level_from_flags(0, false), LevelFilter::Info);
        assert_eq!(level_from_flags(1, false), LevelFilter::Debug);
        assert_eq!(level_from_flags(2, false), LevelFilter::Trace);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), LevelFilter::Warn);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }
}

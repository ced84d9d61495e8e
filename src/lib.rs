//! homelink - connection liveness and diagnostics for Home Assistant servers
//!
//! homelink keeps the push notification channel of every eligible server open
//! over the WebSocket API, and diagnoses step by step why a server URL cannot
//! be reached.

pub mod cli;
pub mod config;
pub mod errors;
pub mod models;
pub mod platform;
pub mod remote;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use errors::*;
pub use models::*;

/// homelink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// homelink application name
pub const APP_NAME: &str = "homelink";

//! Data models and types used throughout homelink

pub mod connectivity;
pub mod notification;
pub mod server;

// Re-export commonly used types
pub use connectivity::*;
pub use notification::*;
pub use server::*;

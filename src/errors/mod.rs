//! Error types shared across homelink

pub mod types;

pub use types::*;

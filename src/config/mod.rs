//! Configuration management for homelink

pub mod app_config;

pub use app_config::*;

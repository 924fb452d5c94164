pub mod component;
pub mod config;
pub mod debug_server;
pub mod health_check;
pub mod instruments;
pub mod notifier;
pub mod registrar;
pub mod runner;
pub mod shutdown;

// Re-export for main.rs
pub use crate::config::Config;
pub use crate::runner::{MetricsServer, MetricsServerConfig, RunnerError};

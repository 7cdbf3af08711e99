//! CLI interface for hub-link
//!
//! Provides subcommands for:
//! - `listen`: Stay connected and log hub events
//! - `invoke`: Call a hub method and print its result
//! - `config`: Show the effective configuration

mod invoke;
mod listen;

pub use invoke::InvokeArgs;
pub use listen::ListenArgs;

use crate::config::HubConfig;
use crate::hub::ConnectionManager;
use crate::transport::WebSocketTransportFactory;
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hub-link")]
#[command(about = "Resilient push-channel client for real-time hubs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Hub endpoint, overrides the configuration file
    #[arg(short, long)]
    pub endpoint: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stay connected and log hub events
    Listen(ListenArgs),
    /// Call a hub method and print its result
    Invoke(InvokeArgs),
    /// Show the effective configuration
    Config,
}

/// Build a WebSocket-backed manager from configuration
pub fn build_manager(hub: &HubConfig) -> ConnectionManager {
    let factory = WebSocketTransportFactory::new(hub.ping_interval());
    ConnectionManager::with_factory(hub.manager_config(), Arc::new(factory))
}

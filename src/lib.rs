//! hub-link: resilient push-channel client for real-time hubs
//!
//! This library provides:
//! - A connection manager with bounded exponential-backoff reconnect
//! - Named event dispatch and connectivity status subscriptions
//! - A WebSocket transport speaking the JSON hub protocol
//! - Decoding for the resolution events the demo hub publishes
//! - Logging and metrics setup

pub mod cli;
pub mod config;
pub mod events;
pub mod hub;
pub mod telemetry;
pub mod transport;

//! Listen command implementation

use crate::config::HubConfig;
use crate::events::{ResolutionEvent, RESOLUTION_EVENT};
use crate::hub::{ConnectionState, EventHandler};
use clap::Args;
use serde_json::Value;

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Hub event to subscribe to
    #[arg(long, default_value = RESOLUTION_EVENT)]
    pub event: String,
}

impl ListenArgs {
    pub async fn execute(&self, hub: &HubConfig) -> anyhow::Result<()> {
        let manager = super::build_manager(hub);

        manager.on(&self.event, EventHandler::new(log_event));
        let status = manager.on_status_change(|state| match state {
            ConnectionState::Failed => tracing::error!(%state, "Hub status"),
            ConnectionState::Reconnecting => tracing::warn!(%state, "Hub status"),
            _ => tracing::info!(%state, "Hub status"),
        });

        tracing::info!(endpoint = %manager.endpoint(), event = %self.event, "Listening for hub events");
        if let Err(e) = manager.connect().await {
            tracing::error!(error = %e, "Could not connect to hub");
        }

        // Stay up through drops; a failed manager waits for Ctrl-C
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");

        status.unsubscribe();
        manager.disconnect().await;
        Ok(())
    }
}

fn log_event(args: &[Value]) {
    match ResolutionEvent::from_args(args) {
        Some(event) => tracing::info!(
            request_id = %event.request_id,
            lifetime = %event.lifetime,
            instance = %event.short_instance_id(),
            index = event.resolution_index,
            created = event.created,
            "Resolution event"
        ),
        None => {
            let payload = Value::from(args.to_vec());
            tracing::info!(payload = %payload, "Hub event");
        }
    }
}

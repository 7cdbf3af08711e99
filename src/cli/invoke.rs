//! Invoke command implementation

use crate::config::HubConfig;
use anyhow::Context;
use clap::Args;
use serde_json::Value;

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Hub method name
    pub method: String,

    /// JSON argument, repeatable; bare words are sent as strings
    #[arg(long = "arg")]
    pub args: Vec<String>,
}

impl InvokeArgs {
    pub async fn execute(&self, hub: &HubConfig) -> anyhow::Result<()> {
        let manager = super::build_manager(hub);
        let args = self.parse_args();

        let result = manager
            .invoke(&self.method, args)
            .await
            .with_context(|| format!("Invoking {} on {}", self.method, manager.endpoint()));
        manager.disconnect().await;

        println!("{}", serde_json::to_string_pretty(&result?)?);
        Ok(())
    }

    fn parse_args(&self) -> Vec<Value> {
        self.args
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
            .collect()
    }
}

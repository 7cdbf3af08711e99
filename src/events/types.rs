//! Resolution event types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Hub event name carrying [`ResolutionEvent`] payloads
pub const RESOLUTION_EVENT: &str = "di-event";

/// One service resolution observed by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionEvent {
    /// Correlates every resolution of one request
    pub request_id: Uuid,
    /// Lifetime label (e.g. "Scoped", "Transient (CAPTIVE)")
    pub lifetime: String,
    pub service_name: String,
    /// Identity of the resolved instance
    pub instance_id: Uuid,
    /// 1-based position within the request
    pub resolution_index: u32,
    /// Whether this resolution created a new instance
    pub created: bool,
    pub timestamp: DateTime<Utc>,
}

impl ResolutionEvent {
    /// Decode the first argument of a hub invocation
    pub fn from_args(args: &[Value]) -> Option<Self> {
        let first = args.first()?;
        serde_json::from_value(first.clone()).ok()
    }

    /// Short form of the instance id for display
    pub fn short_instance_id(&self) -> String {
        self.instance_id.simple().to_string()[..8].to_string()
    }
}

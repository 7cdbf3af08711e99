//! Hub connection core
//!
//! A [`ConnectionManager`] keeps one push channel to a hub endpoint open:
//! it owns the transport, recovers from drops with bounded exponential
//! backoff, routes inbound events through an [`EventDispatcher`] and
//! announces every state transition through a [`StatusBroadcaster`].
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(ManagerConfig::new("https://example.com/hubs/events"));
//! manager.on("ReceiveMessage", EventHandler::new(|args| println!("{:?}", args)));
//! let _status = manager.on_status_change(|state| println!("hub is {}", state));
//! manager.connect().await?;
//! manager.invoke("SendMessage", vec!["hello".into()]).await?;
//! manager.disconnect().await;
//! ```

mod backoff;
mod dispatcher;
mod manager;
mod status;
mod types;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use dispatcher::{EventDispatcher, EventHandler};
pub use manager::ConnectionManager;
pub use status::{StatusBroadcaster, StatusSubscription};
pub use types::{
    ConnectionState, HubError, ManagerConfig, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_OPEN_TIMEOUT,
};

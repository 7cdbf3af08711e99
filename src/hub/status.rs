//! Status broadcaster: connectivity-change subscribers

use super::types::ConnectionState;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::sync::{Arc, Weak};

type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, StatusCallback)>,
}

/// Fans state transitions out to subscribers in registration order.
///
/// The manager holds [`StatusBroadcaster::order`] while it applies a
/// transition and publishes it, so notifications for one transition are
/// finished before the next transition is applied. The lock is reentrant:
/// a callback may subscribe or unsubscribe from inside a notification.
#[derive(Default)]
pub struct StatusBroadcaster {
    order: ReentrantMutex<()>,
    listeners: Mutex<Listeners>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize transitions and their notifications
    pub fn order(&self) -> ReentrantMutexGuard<'_, ()> {
        self.order.lock()
    }

    /// Register `callback` and replay `current` to it once
    pub fn subscribe(
        self: &Arc<Self>,
        current: ConnectionState,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let _order = self.order();
        let callback: StatusCallback = Arc::new(callback);
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, callback.clone()));
            id
        };
        callback(current);

        StatusSubscription {
            id,
            broadcaster: Arc::downgrade(self),
        }
    }

    /// Notify every subscriber of `state`
    pub fn publish(&self, state: ConnectionState) {
        let _order = self.order();
        let callbacks: Vec<StatusCallback> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(state);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().entries.len()
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().entries.retain(|(entry, _)| *entry != id);
    }
}

/// Handle returned by `on_status_change`. Dropping it keeps the
/// subscription; call [`StatusSubscription::unsubscribe`] to end it.
#[derive(Debug)]
pub struct StatusSubscription {
    id: u64,
    broadcaster: Weak<StatusBroadcaster>,
}

impl StatusSubscription {
    pub fn unsubscribe(self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.remove(self.id);
        }
    }
}

//! Event dispatcher: event name to ordered handler list

use crate::telemetry::{increment_counter, CounterMetric};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handler for an inbound hub event. Receives the invocation arguments.
///
/// Handlers are compared by identity: clone the handle you registered to
/// remove it again with [`EventDispatcher::off`].
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&[Value]) + Send + Sync>);

impl EventHandler {
    pub fn new(f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    fn same(&self, other: &EventHandler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn call(&self, payload: &[Value]) {
        (self.0)(payload)
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventHandler")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Registry of event handlers. Event names match case-insensitively, the
/// way hub method names do.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(event: &str) -> String {
        event.to_lowercase()
    }

    /// Append a handler. Registering the same handler twice delivers twice.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(Self::key(event))
            .or_default()
            .push(handler);
    }

    /// Remove the first registration of `handler` for `event`. Returns
    /// whether anything was removed.
    pub fn off(&self, event: &str, handler: &EventHandler) -> bool {
        let key = Self::key(event);
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&key) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| h.same(handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            handlers.remove(&key);
        }
        true
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers
            .read()
            .get(&Self::key(event))
            .map_or(0, Vec::len)
    }

    /// Deliver a message to every handler of `event` in registration
    /// order. A panicking handler is logged and skipped. Returns the number
    /// of handlers that completed.
    pub fn dispatch(&self, event: &str, payload: &[Value]) -> usize {
        // Snapshot so handlers may register or remove handlers
        let handlers = match self.handlers.read().get(&Self::key(event)) {
            Some(list) => list.clone(),
            None => {
                tracing::warn!(event, "No handler registered for hub event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.call(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(event, index, reason = %reason, "Event handler panicked");
                    increment_counter(CounterMetric::HandlerFailures);
                }
            }
        }
        increment_counter(CounterMetric::EventsDelivered);
        delivered
    }
}

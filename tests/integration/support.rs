//! Scripted transport and polling helpers shared by the integration tests

use async_trait::async_trait;
use hub_link::hub::{ConnectionManager, ConnectionState, ManagerConfig, StatusSubscription};
use hub_link::transport::{Transport, TransportError, TransportEvents, TransportFactory};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// State shared between a [`ScriptedFactory`] and the transports it builds
#[derive(Default)]
struct Script {
    /// Outcome of upcoming `start()` calls, front first
    outcomes: Mutex<VecDeque<bool>>,
    /// Outcome once the script runs dry
    fallback: bool,
    /// How long each `start()` takes
    start_delay: Mutex<Duration>,
    /// Report a close from inside the next `start()`, before it succeeds
    close_during_open: AtomicBool,
    created: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    events: Mutex<Vec<TransportEvents>>,
    sent: Mutex<Vec<(String, Vec<Value>)>>,
}

/// Factory whose transports succeed or fail `start()` from a script
#[derive(Clone)]
pub struct ScriptedFactory {
    script: Arc<Script>,
}

impl ScriptedFactory {
    fn with(outcomes: &[bool], fallback: bool) -> Self {
        Self {
            script: Arc::new(Script {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                fallback,
                ..Script::default()
            }),
        }
    }

    pub fn always_ok() -> Self {
        Self::with(&[], true)
    }

    pub fn always_failing() -> Self {
        Self::with(&[], false)
    }

    /// Fail the first `n` starts, then succeed
    pub fn failing_then_ok(n: usize) -> Self {
        Self::with(&vec![false; n], true)
    }

    /// Succeed once, then fail every start
    pub fn ok_then_failing() -> Self {
        Self::with(&[true], false)
    }

    /// Make every `start()` take `delay`
    pub fn slow_start(self, delay: Duration) -> Self {
        *self.script.start_delay.lock() = delay;
        self
    }

    /// The next successful open reports a close before returning
    pub fn close_during_next_open(self) -> Self {
        self.script.close_during_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn created(&self) -> usize {
        self.script.created.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.script.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.script.stops.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, Vec<Value>)> {
        self.script.sent.lock().clone()
    }

    /// Events handle of the `index`-th created transport
    pub fn events(&self, index: usize) -> TransportEvents {
        self.script.events.lock()[index].clone()
    }

    /// Simulate the hub dropping the most recent transport
    pub fn drop_connection(&self) {
        let events = self.script.events.lock().last().cloned();
        if let Some(events) = events {
            events.closed(Some(TransportError::Closed("connection reset".into())));
        }
    }

    /// Simulate an inbound invocation on the most recent transport
    pub fn push_event(&self, target: &str, args: &[Value]) {
        let events = self.script.events.lock().last().cloned();
        if let Some(events) = events {
            events.message(target, args);
        }
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, _endpoint: &str, events: TransportEvents) -> Arc<dyn Transport> {
        self.script.created.fetch_add(1, Ordering::SeqCst);
        self.script.events.lock().push(events);
        Arc::new(ScriptedTransport {
            script: self.script.clone(),
        })
    }
}

struct ScriptedTransport {
    script: Arc<Script>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.script.starts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.script.start_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let ok = self
            .script
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or(self.script.fallback);
        if ok {
            if self.script.close_during_open.swap(false, Ordering::SeqCst) {
                let events = self.script.events.lock().last().cloned();
                if let Some(events) = events {
                    events.closed(Some(TransportError::Closed("reset during open".into())));
                }
            }
            Ok(())
        } else {
            Err(TransportError::Start("connection refused".into()))
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.script.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.script.sent.lock().push((method.to_string(), args));
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        Ok(json!({ "method": method, "args": args }))
    }
}

/// Manager over `factory` with a custom config
pub fn manager_with_config(factory: &ScriptedFactory, config: ManagerConfig) -> ConnectionManager {
    ConnectionManager::with_factory(config, Arc::new(factory.clone()))
}

/// Manager over `factory` with a 1ms backoff
pub fn manager(factory: &ScriptedFactory, max_reconnects: u32) -> ConnectionManager {
    manager_with_backoff(factory, max_reconnects, Duration::from_millis(1))
}

pub fn manager_with_backoff(
    factory: &ScriptedFactory,
    max_reconnects: u32,
    wait: Duration,
) -> ConnectionManager {
    let config = ManagerConfig::new("ws://hub.test/hubs/di-events")
        .max_reconnects(max_reconnects)
        .backoff(move |_attempt: u32| wait)
        .open_timeout(Duration::from_secs(5));
    ConnectionManager::with_factory(config, Arc::new(factory.clone()))
}

/// Record every status notification, including the initial replay
pub fn record_status(
    manager: &ConnectionManager,
) -> (Arc<Mutex<Vec<ConnectionState>>>, StatusSubscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = manager.on_status_change(move |state| sink.lock().push(state));
    (seen, subscription)
}

pub fn count(states: &[ConnectionState], state: ConnectionState) -> usize {
    states.iter().filter(|s| **s == state).count()
}

/// Poll `condition` for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

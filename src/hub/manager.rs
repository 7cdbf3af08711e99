//! Connection manager: transport lifecycle, retry loop and state

use super::dispatcher::{EventDispatcher, EventHandler};
use super::status::{StatusBroadcaster, StatusSubscription};
use super::types::{ConnectionState, HubError, ManagerConfig};
use crate::telemetry::{increment_counter, record_state, CounterMetric};
use crate::transport::{
    Transport, TransportError, TransportEvents, TransportFactory, TransportListener,
    WebSocketTransportFactory,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Result of an in-flight connect or retry, `None` until it settles
type Outcome = Option<Result<(), HubError>>;

/// Result of one open attempt
enum Step {
    /// Terminal outcome for the connection task
    Done(Result<(), HubError>),
    /// Attempt failed, the retry loop continues
    Failed(TransportError),
}

/// How a connection task enters the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    /// `connect()`: open once, then retry on failure
    Connect,
    /// Transport dropped while connected; `Reconnecting` already announced
    Dropped,
}

/// Mutable manager state, guarded by one lock
struct Shared {
    state: ConnectionState,
    attempt: u32,
    manually_stopped: bool,
    /// Bumped by every new connection task and every `disconnect()`.
    /// Tasks only apply transitions while their epoch is current.
    epoch: u64,
    cancel: CancellationToken,
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
    /// Current transport closed between `start()` and `Connected`
    dropped_while_opening: bool,
    /// Outcome of the running connection task, if any
    pending: Option<watch::Receiver<Outcome>>,
}

impl Shared {
    /// Start a new connection task epoch
    fn next_epoch(&mut self) -> (u64, CancellationToken, watch::Sender<Outcome>) {
        self.epoch += 1;
        self.cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        self.pending = Some(rx);
        (self.epoch, self.cancel.clone(), tx)
    }
}

struct Inner {
    config: ManagerConfig,
    factory: Arc<dyn TransportFactory>,
    dispatcher: EventDispatcher,
    status: Arc<StatusBroadcaster>,
    shared: Mutex<Shared>,
    me: Weak<Inner>,
}

/// Resilient channel to a single hub endpoint.
///
/// Cheap to clone; every clone drives the same connection. Construct one
/// per endpoint and hand clones to the consumers that need it.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager that talks to the hub over WebSocket
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_factory(config, Arc::new(WebSocketTransportFactory::default()))
    }

    /// Create a manager with a custom transport factory
    pub fn with_factory(config: ManagerConfig, factory: Arc<dyn TransportFactory>) -> Self {
        let inner = Arc::new_cyclic(|me| Inner {
            config,
            factory,
            dispatcher: EventDispatcher::new(),
            status: Arc::new(StatusBroadcaster::new()),
            shared: Mutex::new(Shared {
                state: ConnectionState::Disconnected,
                attempt: 0,
                manually_stopped: false,
                epoch: 0,
                cancel: CancellationToken::new(),
                transport: None,
                generation: 0,
                dropped_while_opening: false,
                pending: None,
            }),
            me: me.clone(),
        });
        Self { inner }
    }

    /// Hub endpoint this manager connects to
    pub fn endpoint(&self) -> &str {
        &self.inner.config.endpoint
    }

    /// Connect, or wait for the connection attempt already in flight.
    ///
    /// Resolves once the manager is connected, the retry loop gave up
    /// ([`HubError::ReconnectExhausted`]), or `disconnect()` interrupted it
    /// ([`HubError::Cancelled`]).
    pub async fn connect(&self) -> Result<(), HubError> {
        let Some(mut outcome) = self.inner.begin_connect() else {
            return Ok(());
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(HubError::Cancelled))
    }

    /// Stop the connection and any retry loop. Never fails; close errors
    /// are logged.
    pub async fn disconnect(&self) {
        let transport = {
            let _order = self.inner.status.order();
            let (previous, transport) = {
                let mut shared = self.inner.shared.lock();
                shared.manually_stopped = true;
                shared.cancel.cancel();
                shared.epoch += 1;
                shared.attempt = 0;
                shared.pending = None;
                let previous = std::mem::replace(&mut shared.state, ConnectionState::Disconnected);
                (previous, shared.transport.take())
            };
            if previous != ConnectionState::Disconnected {
                self.inner.announce(ConnectionState::Disconnected);
            }
            transport
        };

        if let Some(transport) = transport {
            tracing::info!(endpoint = %self.endpoint(), "Disconnecting from hub");
            self.inner.stop_transport(transport).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Attempt number of the running retry loop, 0 when idle or connected
    pub fn attempt(&self) -> u32 {
        self.inner.shared.lock().attempt
    }

    /// Register a handler for a hub event. Handlers may be registered
    /// before the first `connect()`.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.inner.dispatcher.on(event, handler);
        let mut shared = self.inner.shared.lock();
        self.inner.ensure_transport(&mut shared);
    }

    /// Remove one registration of `handler`; unknown events are ignored
    pub fn off(&self, event: &str, handler: &EventHandler) {
        self.inner.dispatcher.off(event, handler);
    }

    /// Subscribe to state transitions. The callback runs once right away
    /// with the current state.
    pub fn on_status_change(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> StatusSubscription {
        let _order = self.inner.status.order();
        let current = self.state();
        self.inner.status.subscribe(current, callback)
    }

    /// Fire-and-forget invocation of a hub method
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), HubError> {
        let transport = self.ensure_connected().await?;
        transport.send(method, args).await.map_err(HubError::from)
    }

    /// Invoke a hub method and wait for its result
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, HubError> {
        let transport = self.ensure_connected().await?;
        transport.invoke(method, args).await.map_err(HubError::from)
    }

    /// Live transport, connecting first when that is still allowed.
    /// A failed or manually stopped manager only reconnects through an
    /// explicit `connect()`.
    async fn ensure_connected(&self) -> Result<Arc<dyn Transport>, HubError> {
        {
            let shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Connected => {
                    if let Some(transport) = &shared.transport {
                        return Ok(transport.clone());
                    }
                }
                ConnectionState::Failed => {
                    return Err(HubError::NotConnected(
                        "reconnect attempts exhausted".into(),
                    ));
                }
                ConnectionState::Disconnected if shared.manually_stopped => {
                    return Err(HubError::NotConnected("disconnected".into()));
                }
                _ => {}
            }
        }

        self.connect()
            .await
            .map_err(|e| HubError::NotConnected(e.to_string()))?;

        let shared = self.inner.shared.lock();
        match (&shared.transport, shared.state) {
            (Some(transport), ConnectionState::Connected) => Ok(transport.clone()),
            _ => Err(HubError::NotConnected("connection lost".into())),
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("attempt", &self.attempt())
            .finish()
    }
}

impl Inner {
    fn announce(&self, state: ConnectionState) {
        tracing::debug!(endpoint = %self.config.endpoint, state = %state, "Connection state changed");
        record_state(state);
        self.status.publish(state);
    }

    /// Apply `next` (and `update`) if `epoch` is still current. Listener
    /// notifications finish before this returns.
    fn advance(
        &self,
        epoch: u64,
        next: ConnectionState,
        update: impl FnOnce(&mut Shared),
    ) -> bool {
        let _order = self.status.order();
        {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch {
                return false;
            }
            shared.state = next;
            update(&mut shared);
        }
        self.announce(next);
        true
    }

    /// Current transport, built through the factory when absent
    fn ensure_transport(&self, shared: &mut Shared) -> Arc<dyn Transport> {
        if let Some(transport) = &shared.transport {
            return transport.clone();
        }

        shared.generation += 1;
        let listener: Weak<dyn TransportListener> = self.me.clone();
        let events = TransportEvents::new(shared.generation, listener);
        let transport = self.factory.create(&self.config.endpoint, events);
        tracing::debug!(generation = shared.generation, "Created hub transport");

        shared.transport = Some(transport.clone());
        transport
    }

    /// Claim the connection for a new `connect()`. Returns `None` when
    /// already connected, otherwise the outcome to wait on.
    fn begin_connect(&self) -> Option<watch::Receiver<Outcome>> {
        let _order = self.status.order();
        let (epoch, cancel, tx, rx) = {
            let mut shared = self.shared.lock();
            if shared.state == ConnectionState::Connected {
                return None;
            }
            if let Some(pending) = &shared.pending {
                return Some(pending.clone());
            }

            shared.manually_stopped = false;
            shared.attempt = 0;
            shared.state = ConnectionState::Connecting;
            let (epoch, cancel, tx) = shared.next_epoch();
            (epoch, cancel, tx, shared.pending.clone())
        };

        self.announce(ConnectionState::Connecting);
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(me.run(epoch, cancel, Entry::Connect, tx));
        }
        rx
    }

    /// Unexpected transport close: enter the retry loop from `Connected`
    fn handle_drop(self: Arc<Self>, generation: u64, error: Option<TransportError>) {
        let _order = self.status.order();
        let (epoch, cancel, tx) = {
            let mut shared = self.shared.lock();
            if shared.transport.is_none() || shared.generation != generation {
                tracing::debug!(generation, "Ignoring close of discarded transport");
                return;
            }
            if shared.manually_stopped {
                tracing::debug!("Transport closed after manual stop; not reconnecting");
                return;
            }
            if shared.state != ConnectionState::Connected {
                // The running connection task owns recovery; it must not
                // report this transport as connected
                if shared.pending.is_some() {
                    shared.dropped_while_opening = true;
                }
                return;
            }

            shared.attempt = 0;
            shared.state = ConnectionState::Reconnecting;
            shared.next_epoch()
        };

        tracing::warn!(
            endpoint = %self.config.endpoint,
            error = ?error,
            "Hub connection closed unexpectedly"
        );
        self.announce(ConnectionState::Reconnecting);
        tokio::spawn(Arc::clone(&self).run(epoch, cancel, Entry::Dropped, tx));
    }

    /// Connection task: drive one epoch to a terminal outcome
    async fn run(
        self: Arc<Self>,
        epoch: u64,
        cancel: CancellationToken,
        entry: Entry,
        outcome: watch::Sender<Outcome>,
    ) {
        let result = match entry {
            Entry::Connect => match self.try_connect(epoch, &cancel).await {
                Step::Done(result) => result,
                Step::Failed(e) => {
                    tracing::warn!(
                        endpoint = %self.config.endpoint,
                        error = %e,
                        "Initial hub connect failed"
                    );
                    self.retry(epoch, &cancel, false).await
                }
            },
            Entry::Dropped => self.retry(epoch, &cancel, true).await,
        };

        let _ = outcome.send(Some(result));
    }

    /// Bounded retry loop. `announced` skips the first `Reconnecting`
    /// notification when the caller already published it.
    async fn retry(
        &self,
        epoch: u64,
        cancel: &CancellationToken,
        mut announced: bool,
    ) -> Result<(), HubError> {
        let max_attempts = self.config.max_reconnect_attempts;

        loop {
            let attempt = {
                let mut shared = self.shared.lock();
                if shared.epoch != epoch || shared.manually_stopped || cancel.is_cancelled() {
                    return Err(HubError::Cancelled);
                }
                if shared.attempt >= max_attempts {
                    break;
                }
                shared.attempt += 1;
                shared.attempt
            };

            if !std::mem::take(&mut announced)
                && !self.advance(epoch, ConnectionState::Reconnecting, |_| {})
            {
                return Err(HubError::Cancelled);
            }
            increment_counter(CounterMetric::ReconnectAttempts);

            let wait = self.config.backoff.delay(attempt);
            tracing::info!(
                attempt,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                "Hub reconnect attempt scheduled"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(attempt, "Reconnect wait cancelled");
                    return Err(HubError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.try_connect(epoch, cancel).await {
                Step::Done(result) => return result,
                Step::Failed(e) => {
                    tracing::warn!(attempt, error = %e, "Hub reconnect attempt failed");
                }
            }
        }

        tracing::error!(
            endpoint = %self.config.endpoint,
            attempts = max_attempts,
            "Hub reconnect attempts exhausted"
        );
        increment_counter(CounterMetric::ReconnectExhausted);

        let mut discarded = None;
        let applied = self.advance(epoch, ConnectionState::Failed, |shared| {
            shared.pending = None;
            discarded = shared.transport.take();
        });
        if let Some(transport) = discarded {
            self.stop_transport(transport).await;
        }

        if applied {
            Err(HubError::ReconnectExhausted {
                attempts: max_attempts,
            })
        } else {
            Err(HubError::Cancelled)
        }
    }

    /// Open the current transport (building it if absent) within the
    /// configured timeout
    async fn open(
        &self,
        epoch: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        let transport = {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch || cancel.is_cancelled() {
                return Err(TransportError::Start("connection attempt superseded".into()));
            }
            shared.dropped_while_opening = false;
            self.ensure_transport(&mut shared)
        };

        match self.bounded(transport.start()).await {
            Ok(()) => Ok(transport),
            Err(e) => {
                if let TransportError::Timeout(_) = e {
                    // Drop the half-open connection before the next attempt
                    let _ = self.bounded(transport.stop()).await;
                }
                Err(e)
            }
        }
    }

    /// One open attempt: open the transport, then become `Connected`
    /// unless `disconnect()` won or the transport already dropped
    async fn try_connect(&self, epoch: u64, cancel: &CancellationToken) -> Step {
        let transport = match self.open(epoch, cancel).await {
            Ok(transport) => transport,
            Err(e) => return Step::Failed(e),
        };

        let settled = {
            let _order = self.status.order();
            let settled = {
                let mut shared = self.shared.lock();
                if shared.epoch != epoch {
                    None
                } else if std::mem::take(&mut shared.dropped_while_opening) {
                    Some(false)
                } else {
                    shared.state = ConnectionState::Connected;
                    shared.attempt = 0;
                    shared.pending = None;
                    Some(true)
                }
            };
            if settled == Some(true) {
                self.announce(ConnectionState::Connected);
            }
            settled
        };

        match settled {
            Some(true) => {
                tracing::info!(endpoint = %self.config.endpoint, "Hub connected");
                Step::Done(Ok(()))
            }
            Some(false) => Step::Failed(TransportError::Closed("dropped while opening".into())),
            None => {
                // disconnect() already discarded this transport
                self.stop_transport(transport).await;
                Step::Done(Err(HubError::Cancelled))
            }
        }
    }

    async fn stop_transport(&self, transport: Arc<dyn Transport>) {
        if let Err(e) = self.bounded(transport.stop()).await {
            tracing::warn!(error = %e, "Hub transport stop error");
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match self.config.open_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => operation.await,
        }
    }
}

impl TransportListener for Inner {
    fn on_message(&self, generation: u64, target: &str, args: &[Value]) {
        if self.shared.lock().generation != generation {
            tracing::debug!(generation, target, "Dropping message from discarded transport");
            return;
        }
        self.dispatcher.dispatch(target, args);
    }

    fn on_closed(self: Arc<Self>, generation: u64, error: Option<TransportError>) {
        self.handle_drop(generation, error);
    }
}

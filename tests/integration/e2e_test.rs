//! End-to-end tests against a local WebSocket hub

use crate::support::eventually;
use futures_util::{SinkExt, StreamExt};
use hub_link::config::Config;
use hub_link::events::{ResolutionEvent, RESOLUTION_EVENT};
use hub_link::hub::{ConnectionManager, ConnectionState, EventHandler, ManagerConfig};
use hub_link::transport::RECORD_SEPARATOR;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

fn frame(value: serde_json::Value) -> String {
    format!("{}{}", value, RECORD_SEPARATOR)
}

fn resolution(index: u32) -> serde_json::Value {
    json!({
        "requestId": "6f1c2a52-3c1e-4d55-9a57-2a1f0c3e9b10",
        "lifetime": "Transient (CAPTIVE)",
        "serviceName": "Transient",
        "instanceId": "0b7e4f2a-91d3-4c8e-8a6b-5d2e1f3c4a59",
        "resolutionIndex": index,
        "created": true,
        "timestamp": "2024-01-01T12:00:00Z"
    })
}

/// Hub that pushes one resolution event per connection. The first
/// connection is closed by the hub right after its event.
async fn spawn_hub() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                // Handshake request
                let _ = ws.next().await;
                ws.send(Message::Text(frame(json!({})))).await.unwrap();

                let event = frame(json!({
                    "type": 1,
                    "target": RESOLUTION_EVENT,
                    "arguments": [resolution(index)],
                }));
                ws.send(Message::Text(event)).await.unwrap();

                if index == 1 {
                    let _ = ws.close(None).await;
                    return;
                }
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    (format!("http://{}/hubs/di-events", addr), connections)
}

#[tokio::test]
async fn test_receives_events_and_recovers_from_hub_close() {
    let (endpoint, connections) = spawn_hub().await;
    let config = ManagerConfig::new(endpoint)
        .backoff(|_attempt: u32| Duration::from_millis(10))
        .open_timeout(Duration::from_secs(5));
    let manager = ConnectionManager::new(config);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager.on(
        RESOLUTION_EVENT,
        EventHandler::new(move |args| {
            if let Some(event) = ResolutionEvent::from_args(args) {
                sink.lock().push(event);
            }
        }),
    );

    let states = Arc::new(Mutex::new(Vec::new()));
    let state_sink = states.clone();
    let _sub = manager.on_status_change(move |state| state_sink.lock().push(state));

    manager.connect().await.unwrap();

    assert!(
        eventually(|| received.lock().len() >= 2 && manager.is_connected()).await,
        "states: {:?}",
        states.lock()
    );
    assert_eq!(connections.load(Ordering::SeqCst), 2);

    let received = received.lock().clone();
    assert_eq!(received[0].resolution_index, 1);
    assert_eq!(received[1].resolution_index, 2);
    assert_eq!(received[1].lifetime, "Transient (CAPTIVE)");

    let states = states.lock().clone();
    assert!(states.contains(&ConnectionState::Reconnecting));
    assert_eq!(states.last(), Some(&ConnectionState::Connected));

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unreachable_hub_exhausts_retries() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let config = ManagerConfig::new(format!("http://{}/hubs/di-events", addr))
        .max_reconnects(2)
        .backoff(|_attempt: u32| Duration::from_millis(5))
        .open_timeout(Duration::from_secs(2));
    let manager = ConnectionManager::new(config);

    let err = manager.connect().await.unwrap_err();
    assert_eq!(
        err,
        hub_link::hub::HubError::ReconnectExhausted { attempts: 2 }
    );
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[test]
fn test_config_example_loads() {
    let config: Config = toml::from_str(include_str!("../../config.toml.example")).unwrap();
    let manager = config.hub.manager_config();

    assert_eq!(manager.endpoint, config.hub.endpoint);
    assert_eq!(manager.max_reconnect_attempts, 5);
    assert_eq!(manager.open_timeout, Some(Duration::from_secs(15)));
}

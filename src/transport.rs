//! Transport boundary
//!
//! The engine only needs publish/subscribe with topic patterns and a view of
//! the link state. [`InProcessBus`] provides that over a tokio broadcast
//! channel; a broker-backed client can implement [`Transport`] the same way.
//!
//! Topic conventions:
//! - `{plantId}/{stationId}/points/{pointKey}` telemetry, payload `TelemetryPoint`
//! - `{plantId}/{stationId}/commands/set` outbound command
//! - `{plantId}/{stationId}/commands/response` device response

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{CommandKind, CommandResult, CommandStatus, TelemetryPoint, UnitKey};
use crate::state::AppState;

/// Default buffer capacity for the broadcast channel
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A message on the bus
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Publish/subscribe capability consumed by the engine
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError>;

    fn subscribe(&self, pattern: &str) -> Subscription;

    fn is_connected(&self) -> bool;
}

/// Receiver filtered by a topic pattern
pub struct Subscription {
    pattern: String,
    receiver: broadcast::Receiver<TransportMessage>,
}

impl Subscription {
    /// Next matching message; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<TransportMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if topic_matches(&self.pattern, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(pattern = %self.pattern, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching message already buffered, without waiting
    pub fn try_recv(&mut self) -> Option<TransportMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) if topic_matches(&self.pattern, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// In-process fan-out bus with a simulated link state
pub struct InProcessBus {
    sender: broadcast::Sender<TransportMessage>,
    link: watch::Sender<bool>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (link, _) = watch::channel(true);
        Self { sender, link }
    }

    /// Flip the link state; publishes fail while down
    pub fn set_connected(&self, connected: bool) {
        info!(connected, "Transport link state changed");
        self.link.send_replace(connected);
    }

    /// Watch link state changes
    pub fn link_state(&self) -> watch::Receiver<bool> {
        self.link.subscribe()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Transport for InProcessBus {
    fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        debug!(topic = %topic, "Publishing");
        // A send error only means there are zero receivers
        let _ = self.sender.send(TransportMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            receiver: self.sender.subscribe(),
        }
    }

    fn is_connected(&self) -> bool {
        *self.link.borrow()
    }
}

/// MQTT-style match: `+` matches one level, `#` matches the rest
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Inbound topic, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Point { unit: UnitKey, point_key: String },
    CommandResponse { unit: UnitKey },
}

pub fn classify_topic(topic: &str) -> Option<Inbound> {
    let levels: Vec<&str> = topic.split('/').collect();
    match levels.as_slice() {
        [plant, station, "points", point_key] => Some(Inbound::Point {
            unit: UnitKey::new(*plant, *station),
            point_key: point_key.to_string(),
        }),
        [plant, station, "commands", "response"] => Some(Inbound::CommandResponse {
            unit: UnitKey::new(*plant, *station),
        }),
        _ => None,
    }
}

pub fn point_topic(unit: &UnitKey, point_key: &str) -> String {
    format!("{}/{}/points/{}", unit.plant_id, unit.station_id, point_key)
}

pub fn command_topic(unit: &UnitKey) -> String {
    format!("{}/{}/commands/set", unit.plant_id, unit.station_id)
}

pub fn response_topic(unit: &UnitKey) -> String {
    format!("{}/{}/commands/response", unit.plant_id, unit.station_id)
}

/// Outbound command payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub command_id: Uuid,
    pub plant_id: String,
    pub station_id: String,
    pub command: CommandKind,
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Device response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponsePayload {
    pub command_id: Uuid,
    pub status: CommandStatus,
    #[serde(default)]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<CommandResponsePayload> for CommandResult {
    fn from(payload: CommandResponsePayload) -> Self {
        CommandResult {
            command_id: payload.command_id,
            status: payload.status,
            message: payload.message,
            timestamp: payload.timestamp,
        }
    }
}

/// Route bus traffic into the engine until the bus closes
pub fn spawn_transport_listener(state: Arc<RwLock<AppState>>, bus: Arc<InProcessBus>) {
    let mut subscription = bus.subscribe("#");
    let mut link = bus.link_state();

    tokio::spawn(async move {
        info!("Transport listener started");
        loop {
            tokio::select! {
                msg = subscription.recv() => {
                    let Some(msg) = msg else {
                        info!("Transport closed, listener exiting");
                        break;
                    };
                    handle_message(&state, msg).await;
                }
                changed = link.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let up = *link.borrow_and_update();
                    let mut state = state.write().await;
                    if up {
                        state.on_transport_up();
                    } else {
                        state.on_transport_down(Utc::now());
                    }
                }
            }
        }
    });
}

async fn handle_message(state: &Arc<RwLock<AppState>>, msg: TransportMessage) {
    match classify_topic(&msg.topic) {
        Some(Inbound::Point { unit, point_key }) => {
            match serde_json::from_value::<TelemetryPoint>(msg.payload) {
                Ok(point) => {
                    state.write().await.ingest(&unit, &point_key, point, Utc::now());
                }
                Err(e) => warn!(topic = %msg.topic, error = %e, "Malformed telemetry payload"),
            }
        }
        Some(Inbound::CommandResponse { unit }) => {
            match serde_json::from_value::<CommandResponsePayload>(msg.payload) {
                Ok(response) => {
                    debug!(unit = %unit, command_id = %response.command_id, "Command response received");
                    let correlator = state.read().await.correlator().clone();
                    correlator.resolve(response.command_id, response.into());
                }
                Err(e) => warn!(topic = %msg.topic, error = %e, "Malformed command response"),
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_patterns() {
        assert!(topic_matches("#", "p1/ahu-1/points/temperature"));
        assert!(topic_matches("+/+/commands/set", "p1/ahu-1/commands/set"));
        assert!(!topic_matches("+/+/commands/set", "p1/ahu-1/commands/response"));
        assert!(topic_matches("p1/+/points/#", "p1/ahu-2/points/humidity"));
        assert!(!topic_matches("p1/+/points", "p1/ahu-2/points/humidity"));
    }

    #[test]
    fn test_classify_topic() {
        assert_eq!(
            classify_topic("p1/ahu-1/points/temperature"),
            Some(Inbound::Point {
                unit: UnitKey::new("p1", "ahu-1"),
                point_key: "temperature".into()
            })
        );
        assert_eq!(
            classify_topic("p1/ahu-1/commands/response"),
            Some(Inbound::CommandResponse {
                unit: UnitKey::new("p1", "ahu-1")
            })
        );
        assert_eq!(classify_topic("p1/ahu-1/commands/set"), None);
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber_only() {
        let bus = InProcessBus::default();
        let mut commands = bus.subscribe("+/+/commands/set");

        bus.publish("p1/ahu-1/points/temperature", serde_json::json!({"value": 20.0}))
            .unwrap();
        bus.publish("p1/ahu-1/commands/set", serde_json::json!({"x": 1}))
            .unwrap();

        let msg = commands.recv().await.unwrap();
        assert_eq!(msg.topic, "p1/ahu-1/commands/set");
        assert!(commands.try_recv().is_none());
    }

    #[test]
    fn test_publish_fails_while_disconnected() {
        let bus = InProcessBus::default();
        bus.set_connected(false);

        let result = bus.publish("p1/ahu-1/commands/set", serde_json::json!({}));
        assert!(matches!(result, Err(TransportError::Disconnected)));
        assert!(!bus.is_connected());
    }

    #[test]
    fn test_response_payload_wire_format() {
        let json = serde_json::json!({
            "commandId": Uuid::nil(),
            "status": "SUCCESS",
            "timestamp": "2024-01-01T00:00:00Z"
        });
        let payload: CommandResponsePayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.status, CommandStatus::Success);
        assert!(payload.message.is_none());
    }
}

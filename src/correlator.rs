//! Command correlation
//!
//! Issues setpoint commands with a unique id and resolves each caller
//! exactly once: from the matching device response or from deadline
//! expiry, whichever happens first. Pending state is in-memory only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{CommandRequest, CommandResult, CommandStatus};
use crate::transport::{command_topic, CommandPayload, Transport, TransportError};

/// Bounded wait for a device response
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// An issued command awaiting its single outcome
struct PendingCommand {
    issued_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    sink: oneshot::Sender<CommandResult>,
    timer: Option<JoinHandle<()>>,
}

/// Cheap to clone; clones share the pending map
#[derive(Clone)]
pub struct CommandCorrelator {
    pending: Arc<Mutex<HashMap<Uuid, PendingCommand>>>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl CommandCorrelator {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            transport,
            timeout,
        }
    }

    /// Register, arm the deadline timer and publish once. Returns immediately;
    /// the outcome arrives on the receiver. Must be called within a tokio runtime.
    pub fn issue(&self, request: &CommandRequest) -> (Uuid, oneshot::Receiver<CommandResult>) {
        let command_id = Uuid::new_v4();
        let issued_at = Utc::now();
        let deadline = issued_at
            + chrono::Duration::from_std(self.timeout).unwrap_or_else(|_| chrono::Duration::seconds(10));
        let (sink, receiver) = oneshot::channel();

        {
            // The timer cannot remove the entry before it is inserted: it
            // needs this same lock.
            let mut pending = self.pending.lock();
            let timer = self.spawn_timer(command_id);
            pending.insert(
                command_id,
                PendingCommand {
                    issued_at,
                    deadline,
                    sink,
                    timer: Some(timer),
                },
            );
        }

        let unit = request.key();
        let payload = CommandPayload {
            command_id,
            plant_id: request.plant_id.clone(),
            station_id: request.station_id.clone(),
            command: request.command,
            value: request.value.clone(),
            timestamp: issued_at,
        };

        let published = serde_json::to_value(&payload)
            .map_err(TransportError::from)
            .and_then(|json| self.transport.publish(&command_topic(&unit), json));

        match published {
            Ok(()) => info!(
                command_id = %command_id,
                plant_id = %request.plant_id,
                station_id = %request.station_id,
                command = ?request.command,
                "Command issued"
            ),
            Err(e) => {
                warn!(command_id = %command_id, error = %e, "Command publish failed");
                self.resolve(
                    command_id,
                    CommandResult {
                        command_id,
                        status: CommandStatus::Error,
                        message: Some(format!("Transport unavailable: {e}")),
                        timestamp: Utc::now(),
                    },
                );
            }
        }

        (command_id, receiver)
    }

    /// Deliver a device outcome. Unknown or already-settled ids are logged
    /// and dropped; returns whether a pending command was settled.
    pub fn resolve(&self, command_id: Uuid, result: CommandResult) -> bool {
        let Some(mut pending) = self.pending.lock().remove(&command_id) else {
            debug!(command_id = %command_id, status = ?result.status, "Response for unknown or settled command, ignored");
            return false;
        };

        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        info!(
            command_id = %command_id,
            status = ?result.status,
            latency_ms = (Utc::now() - pending.issued_at).num_milliseconds(),
            "Command resolved"
        );
        deliver(pending, result);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn deadline(&self, command_id: &Uuid) -> Option<DateTime<Utc>> {
        self.pending.lock().get(command_id).map(|p| p.deadline)
    }

    fn spawn_timer(&self, command_id: Uuid) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let Some(expired) = pending.lock().remove(&command_id) else {
                return;
            };

            warn!(command_id = %command_id, timeout_secs = timeout.as_secs(), "Command timed out");
            deliver(
                expired,
                CommandResult {
                    command_id,
                    status: CommandStatus::Timeout,
                    message: Some(format!("No response within {} seconds", timeout.as_secs())),
                    timestamp: Utc::now(),
                },
            );
        })
    }
}

fn deliver(pending: PendingCommand, result: CommandResult) {
    if pending.sink.send(result).is_err() {
        debug!("Command caller went away before the outcome was delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommandKind;
    use crate::transport::InProcessBus;
    use tokio_test::{assert_err, assert_ok};

    fn fan_on() -> CommandRequest {
        CommandRequest {
            plant_id: "plant-1".into(),
            station_id: "ahu-1".into(),
            command: CommandKind::FanStatus,
            value: serde_json::json!("ON"),
        }
    }

    fn success(command_id: Uuid) -> CommandResult {
        CommandResult {
            command_id,
            status: CommandStatus::Success,
            message: Some("applied".into()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_before_deadline_delivers_once() {
        let bus = Arc::new(InProcessBus::default());
        let mut published = bus.subscribe("+/+/commands/set");
        let correlator = CommandCorrelator::new(bus.clone(), DEFAULT_COMMAND_TIMEOUT);

        let (id, rx) = correlator.issue(&fan_on());

        let msg = published.try_recv().unwrap();
        assert_eq!(msg.topic, "plant-1/ahu-1/commands/set");
        assert_eq!(msg.payload["commandId"], serde_json::json!(id));
        assert_eq!(msg.payload["value"], "ON");
        assert!(published.try_recv().is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(correlator.resolve(id, success(id)));

        let result = assert_ok!(rx.await);
        assert_eq!(result.status, CommandStatus::Success);

        // Timer was cancelled: nothing left to fire
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(id, success(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_late_response_is_noop() {
        let bus = Arc::new(InProcessBus::default());
        let correlator = CommandCorrelator::new(bus, DEFAULT_COMMAND_TIMEOUT);

        let (id, mut rx) = correlator.issue(&fan_on());

        tokio::time::advance(Duration::from_millis(9_900)).await;
        tokio::task::yield_now().await;
        assert_err!(rx.try_recv());

        tokio::time::advance(Duration::from_millis(200)).await;
        let result = assert_ok!(rx.await);

        assert_eq!(result.status, CommandStatus::Timeout);
        assert_eq!(result.message.as_deref(), Some("No response within 10 seconds"));
        assert_eq!(result.command_id, id);
        assert!(!correlator.resolve(id, success(id)));
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let correlator = CommandCorrelator::new(Arc::new(InProcessBus::default()), DEFAULT_COMMAND_TIMEOUT);
        let stray = Uuid::new_v4();
        assert!(!correlator.resolve(stray, success(stray)));
    }

    #[tokio::test]
    async fn test_publish_failure_resolves_as_error() {
        let bus = Arc::new(InProcessBus::default());
        bus.set_connected(false);
        let correlator = CommandCorrelator::new(bus, DEFAULT_COMMAND_TIMEOUT);

        let (_, rx) = correlator.issue(&fan_on());
        let result = rx.await.unwrap();

        assert_eq!(result.status, CommandStatus::Error);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_deadline_set() {
        let correlator = CommandCorrelator::new(Arc::new(InProcessBus::default()), DEFAULT_COMMAND_TIMEOUT);
        let (a, _rx_a) = correlator.issue(&fan_on());
        let (b, _rx_b) = correlator.issue(&fan_on());

        assert_ne!(a, b);
        assert_eq!(correlator.pending_count(), 2);
        let deadline = correlator.deadline(&a).unwrap();
        assert!(deadline > Utc::now() + chrono::Duration::seconds(9));
    }
}

//! Application state management
//!
//! Central state container composing the point store, event tracker,
//! connectivity monitor, acknowledgment store and command correlator.
//! Each component is the single owner of its state; this container is the
//! only place where their updates are dispatched, in a fixed order.
//!
//! Ordering within one update: connectivity is settled first, then the
//! status state machine, then acknowledgment pruning. A stale unit is
//! never given a status event until a fresh message reconnects it.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ack::AckStore;
use crate::connectivity::{ConnectivityChange, ConnectivityMonitor};
use crate::correlator::CommandCorrelator;
use crate::error::{AppError, AppResult};
use crate::events::{EventSummary, EventTracker};
use crate::health::evaluate;
use crate::models::{
    AckRecord, AckSeverity, CommandAck, CommandRequest, CommandResult, Event, HealthStatus,
    TelemetryPoint, Thresholds, UnitKey, UnitSnapshot, UnitView, WsMessage,
};
use crate::store::PointStore;
use crate::validation::validate_command;

/// Number of command outcomes kept for lookup
const MAX_COMMAND_RESULTS: usize = 100;

/// Buffer of the outward push channel
const PUSH_CHANNEL_CAPACITY: usize = 256;

pub type SharedState = Arc<RwLock<AppState>>;

/// Central application state
pub struct AppState {
    store: PointStore,
    tracker: EventTracker,
    connectivity: ConnectivityMonitor,
    acks: AckStore,
    thresholds: Thresholds,
    correlator: CommandCorrelator,
    /// Most recent command outcomes, newest last
    command_results: VecDeque<CommandResult>,
    /// Issued commands whose outcome has not been recorded yet
    in_flight: HashSet<Uuid>,
    push: broadcast::Sender<WsMessage>,
    start_time: DateTime<Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(correlator: CommandCorrelator, thresholds: Thresholds, acks: AckStore) -> Self {
        info!("Initializing application state");
        let (push, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Self {
            store: PointStore::new(),
            tracker: EventTracker::new(),
            connectivity: ConnectivityMonitor::new(),
            acks,
            thresholds,
            correlator,
            command_results: VecDeque::with_capacity(MAX_COMMAND_RESULTS),
            in_flight: HashSet::new(),
            push,
            start_time: Utc::now(),
        }
    }

    /// Apply one point update and run the update pipeline
    pub fn ingest(
        &mut self,
        unit: &UnitKey,
        point_key: &str,
        point: TelemetryPoint,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let snapshot = self.store.update(unit, point_key, point, now).clone();

        if let Some(ConnectivityChange::Reconnected(key)) = self.connectivity.record_seen(unit, now) {
            debug!(unit = %key, "Reconnection, reconciling status");
        }

        let mut events = Vec::new();
        if let Some(event) = self.tracker.on_snapshot(&snapshot, now) {
            if event.event_type == HealthStatus::Ok {
                self.acks.clear(&unit.plant_id, &unit.station_id);
            }
            events.push(event);
        }

        self.prune_acks(now);

        self.broadcast(WsMessage::Update(snapshot));
        for event in &events {
            self.broadcast(WsMessage::Event(event.clone()));
        }
        events
    }

    /// Staleness sweep; emits one DISCONNECTED event per newly stale unit
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let changes = self
            .connectivity
            .sweep(now, self.thresholds.disconnect_timeout_ms);

        let events: Vec<Event> = changes
            .into_iter()
            .filter_map(|change| match change {
                ConnectivityChange::Disconnected(key) => self.tracker.mark_disconnected(&key, now),
                ConnectivityChange::Reconnected(_) => None,
            })
            .collect();

        if !events.is_empty() {
            self.prune_acks(now);
            for event in &events {
                self.broadcast(WsMessage::Event(event.clone()));
            }
        }
        events
    }

    /// Full transport outage: suspend sweeps and mark every unit disconnected
    pub fn on_transport_down(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        warn!("Transport link down");
        self.connectivity.set_transport_up(false);

        let events: Vec<Event> = self
            .connectivity
            .mark_all_disconnected()
            .iter()
            .filter_map(|key| self.tracker.mark_disconnected(key, now))
            .collect();

        self.prune_acks(now);
        for event in &events {
            self.broadcast(WsMessage::Event(event.clone()));
        }
        events
    }

    /// Link restored: resume sweeps and reconcile counts without rewriting history.
    /// Units still marked disconnected keep zero counts until they report again.
    pub fn on_transport_up(&mut self) {
        info!("Transport link up");
        self.connectivity.set_transport_up(true);
        let connected: Vec<UnitSnapshot> = self
            .store
            .snapshots()
            .into_iter()
            .filter(|snapshot| self.connectivity.is_connected(&snapshot.key()))
            .collect();
        self.tracker.update_active_counts_from_snapshot(&connected);
    }

    /// Seed the event tracker from an already populated store without
    /// emitting events. The service itself starts with an empty store, so
    /// this is only for callers that preload snapshots before serving.
    #[allow(dead_code)]
    pub fn initialize_tracker(&mut self) {
        let snapshots = self.store.snapshots();
        self.tracker.initialize_from_snapshot(&snapshots);
    }

    /// Status used for acknowledgment pruning: connectivity first, then evaluation
    pub fn current_statuses(&self, now: DateTime<Utc>) -> HashMap<UnitKey, HealthStatus> {
        self.store
            .snapshots()
            .into_iter()
            .map(|snapshot| {
                let key = snapshot.key();
                let status = if self.connectivity.is_connected(&key) {
                    evaluate(&snapshot, &self.thresholds, now).status
                } else {
                    HealthStatus::Disconnected
                };
                (key, status)
            })
            .collect()
    }

    /// Current status of one unit, if it is known
    pub fn current_status(&self, key: &UnitKey, now: DateTime<Utc>) -> Option<HealthStatus> {
        let snapshot = self.store.get(key)?;
        Some(if self.connectivity.is_connected(key) {
            evaluate(snapshot, &self.thresholds, now).status
        } else {
            HealthStatus::Disconnected
        })
    }

    /// Acknowledge the episode the unit is currently in. An ack for any other
    /// severity would be pruned on the next update, so it is refused.
    pub fn acknowledge(
        &mut self,
        key: &UnitKey,
        for_status: AckSeverity,
        operator: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AckRecord> {
        let status = self
            .current_status(key, now)
            .ok_or_else(|| AppError::NotFound(format!("Unit {} not found", key)))?;

        if !for_status.matches(status) {
            return Err(AppError::Conflict(format!(
                "Unit {} is {}, nothing to acknowledge as {:?}",
                key, status, for_status
            )));
        }

        Ok(self
            .acks
            .add(&key.plant_id, &key.station_id, for_status, operator, now))
    }

    fn prune_acks(&mut self, now: DateTime<Utc>) {
        if self.acks.is_empty() {
            return;
        }
        let statuses = self.current_statuses(now);
        self.acks.prune_stale(&statuses);
    }

    /// Snapshot plus derived state, for every unit
    pub fn unit_views(&self, now: DateTime<Utc>) -> Vec<UnitView> {
        self.store
            .snapshots()
            .into_iter()
            .map(|snapshot| self.view_of(snapshot, now))
            .collect()
    }

    pub fn unit_view(&self, key: &UnitKey, now: DateTime<Utc>) -> Option<UnitView> {
        self.store
            .get(key)
            .cloned()
            .map(|snapshot| self.view_of(snapshot, now))
    }

    fn view_of(&self, snapshot: UnitSnapshot, now: DateTime<Utc>) -> UnitView {
        let key = snapshot.key();
        let connected = self.connectivity.is_connected(&key);
        let mut health = evaluate(&snapshot, &self.thresholds, now);
        if !connected {
            health.status = HealthStatus::Disconnected;
            health.bad_point_count = 0;
        }

        UnitView {
            alarm_acknowledged: self
                .acks
                .is_acknowledged(&key.plant_id, &key.station_id, AckSeverity::Alarm)
                .is_some(),
            warning_acknowledged: self
                .acks
                .is_acknowledged(&key.plant_id, &key.station_id, AckSeverity::Warning)
                .is_some(),
            snapshot,
            health,
            connected,
        }
    }

    pub fn snapshots(&self) -> Vec<UnitSnapshot> {
        self.store.snapshots()
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn recent_events(&self, limit: usize) -> Vec<&Event> {
        self.tracker.recent(limit)
    }

    pub fn event_summary(&self, now: DateTime<Utc>, minutes: i64) -> EventSummary {
        self.tracker.summary(now, Duration::minutes(minutes))
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Hot-swap thresholds; acknowledgments are re-checked immediately
    pub fn set_thresholds(&mut self, thresholds: Thresholds, now: DateTime<Utc>) {
        info!(?thresholds, "Thresholds replaced");
        self.thresholds = thresholds;
        self.prune_acks(now);
    }

    pub fn acks(&self) -> &AckStore {
        &self.acks
    }

    pub fn acks_mut(&mut self) -> &mut AckStore {
        &mut self.acks
    }

    pub fn correlator(&self) -> &CommandCorrelator {
        &self.correlator
    }

    /// Track a command between issue and its recorded outcome
    pub fn mark_in_flight(&mut self, command_id: Uuid) {
        self.in_flight.insert(command_id);
    }

    pub fn is_in_flight(&self, command_id: &Uuid) -> bool {
        self.in_flight.contains(command_id)
    }

    pub fn record_command_result(&mut self, result: CommandResult) {
        self.in_flight.remove(&result.command_id);
        if self.command_results.len() >= MAX_COMMAND_RESULTS {
            self.command_results.pop_front();
        }
        self.command_results.push_back(result);
    }

    pub fn command_result(&self, command_id: &Uuid) -> Option<&CommandResult> {
        self.command_results
            .iter()
            .rev()
            .find(|r| &r.command_id == command_id)
    }

    /// Subscribe to outward push messages
    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.push.subscribe()
    }

    pub fn broadcast(&self, msg: WsMessage) {
        // Ignore the SendError: it only means there are no connected clients
        let _ = self.push.send(msg);
    }

    pub fn transport_up(&self) -> bool {
        self.connectivity.transport_up()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        (Utc::now() - self.start_time).num_seconds().max(0) as u64
    }
}

/// Issue a command and return at once. The single outcome is pushed as
/// `command:result` and kept for lookup when it arrives.
pub async fn execute_command(state: &SharedState, request: CommandRequest) -> AppResult<CommandAck> {
    validate_command(&request)?;

    let correlator = state.read().await.correlator().clone();
    let (command_id, outcome) = correlator.issue(&request);
    // Marked before the outcome task exists, so lookups never miss the id
    state.write().await.mark_in_flight(command_id);

    let state = Arc::clone(state);
    tokio::spawn(async move {
        let result = outcome.await;
        let mut state = state.write().await;
        match result {
            Ok(result) => {
                state.broadcast(WsMessage::CommandResult(result.clone()));
                state.record_command_result(result);
            }
            Err(_) => {
                warn!(command_id = %command_id, "Command outcome channel dropped");
                state.in_flight.remove(&command_id);
            }
        }
    });

    Ok(CommandAck { command_id })
}

/// Recurring staleness sweep
pub fn spawn_connectivity_monitor(state: SharedState, interval_ms: u64) {
    tokio::spawn(async move {
        info!(interval_ms, "Connectivity monitor started");
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            ticker.tick().await;
            let events = state.write().await.sweep(Utc::now());
            if !events.is_empty() {
                debug!(disconnected = events.len(), "Sweep detected stale units");
            }
        }
    });
}

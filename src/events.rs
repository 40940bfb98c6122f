//! Event tracking
//!
//! Per-unit status state machine that turns status transitions into
//! ordered, bounded event records and keeps per-unit active counts.
//!
//! The tracker listens to the device-reported `status` point vocabulary
//! (OK/WARNING/ALARM); DISCONNECTED transitions are injected by the
//! connectivity monitor through [`EventTracker::mark_disconnected`].

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

use crate::health::reported_status;
use crate::models::{Event, HealthStatus, UnitKey, UnitSnapshot};

/// Maximum number of events kept in the global log
pub const EVENT_LOG_CAPACITY: usize = 50;

/// Active alarm/warning counts for one unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActiveCounts {
    pub alarms: u32,
    pub warnings: u32,
}

impl ActiveCounts {
    fn for_status(status: HealthStatus) -> Self {
        Self {
            alarms: u32::from(status == HealthStatus::Alarm),
            warnings: u32::from(status == HealthStatus::Warning),
        }
    }
}

/// Short-window aggregate over the tracker state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub active_alarms: u32,
    pub active_warnings: u32,
    pub window_minutes: i64,
    pub recent_alarms: usize,
    pub recent_warnings: usize,
    pub recent_disconnects: usize,
    pub recent_recoveries: usize,
}

/// Status state machine and bounded event log
#[derive(Debug)]
pub struct EventTracker {
    last_status: HashMap<UnitKey, HealthStatus>,
    active_counts: HashMap<UnitKey, ActiveCounts>,
    /// Newest first
    log: VecDeque<Event>,
    capacity: usize,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last_status: HashMap::new(),
            active_counts: HashMap::new(),
            log: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Fold one snapshot into the state machine, emitting an event on transition.
    ///
    /// The first observation of an unknown unit only emits when it arrives
    /// already in WARNING or ALARM.
    pub fn on_snapshot(&mut self, snapshot: &UnitSnapshot, now: DateTime<Utc>) -> Option<Event> {
        let key = snapshot.key();
        let status = device_status(snapshot);
        let previous = self.last_status.insert(key.clone(), status);
        self.active_counts
            .insert(key.clone(), ActiveCounts::for_status(status));

        let transitioned = match previous {
            Some(prev) => prev != status,
            None => status != HealthStatus::Ok,
        };
        if !transitioned {
            return None;
        }

        let message = transition_message(&key, previous, status);
        Some(self.push(&key, status, message, now))
    }

    /// Record a connectivity loss. Emits once per transition and zeroes the
    /// unit's active counts.
    pub fn mark_disconnected(&mut self, key: &UnitKey, now: DateTime<Utc>) -> Option<Event> {
        self.active_counts.insert(key.clone(), ActiveCounts::default());

        let previous = self
            .last_status
            .insert(key.clone(), HealthStatus::Disconnected);
        if previous == Some(HealthStatus::Disconnected) {
            return None;
        }

        let message = transition_message(key, previous, HealthStatus::Disconnected);
        Some(self.push(key, HealthStatus::Disconnected, message, now))
    }

    /// Seed state without emitting events (startup / client reconnect)
    pub fn initialize_from_snapshot(&mut self, units: &[UnitSnapshot]) {
        for snapshot in units {
            let status = device_status(snapshot);
            let key = snapshot.key();
            self.last_status.insert(key.clone(), status);
            self.active_counts.insert(key, ActiveCounts::for_status(status));
        }
        info!(units = units.len(), "Event tracker seeded from snapshot");
    }

    /// Recompute active counts only; event history and last status are untouched
    pub fn update_active_counts_from_snapshot(&mut self, units: &[UnitSnapshot]) {
        for snapshot in units {
            self.active_counts
                .insert(snapshot.key(), ActiveCounts::for_status(device_status(snapshot)));
        }
        debug!(units = units.len(), "Active counts reconciled");
    }

    pub fn last_status(&self, key: &UnitKey) -> Option<HealthStatus> {
        self.last_status.get(key).copied()
    }

    pub fn active_counts(&self, key: &UnitKey) -> ActiveCounts {
        self.active_counts.get(key).copied().unwrap_or_default()
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<&Event> {
        self.log.iter().take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Aggregate counts: current active totals plus events within `window`
    pub fn summary(&self, now: DateTime<Utc>, window: Duration) -> EventSummary {
        let (active_alarms, active_warnings) = self
            .active_counts
            .values()
            .fold((0, 0), |(a, w), c| (a + c.alarms, w + c.warnings));

        let cutoff = now - window;
        let recent: Vec<&Event> = self.log.iter().filter(|e| e.timestamp >= cutoff).collect();
        let count = |t: HealthStatus| recent.iter().filter(|e| e.event_type == t).count();

        EventSummary {
            active_alarms,
            active_warnings,
            window_minutes: window.num_minutes(),
            recent_alarms: count(HealthStatus::Alarm),
            recent_warnings: count(HealthStatus::Warning),
            recent_disconnects: count(HealthStatus::Disconnected),
            recent_recoveries: count(HealthStatus::Ok),
        }
    }

    fn push(
        &mut self,
        key: &UnitKey,
        event_type: HealthStatus,
        message: String,
        now: DateTime<Utc>,
    ) -> Event {
        let event = Event {
            id: Uuid::new_v4(),
            timestamp: now,
            plant_id: key.plant_id.clone(),
            station_id: key.station_id.clone(),
            event_type,
            message,
        };

        info!(
            plant_id = %key.plant_id,
            station_id = %key.station_id,
            event_type = %event_type,
            message = %event.message,
            "Status transition"
        );

        if self.log.len() >= self.capacity {
            self.log.pop_back();
        }
        self.log.push_front(event.clone());
        event
    }
}

impl Default for EventTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Status as reported by the device itself
fn device_status(snapshot: &UnitSnapshot) -> HealthStatus {
    match reported_status(snapshot) {
        Some("ALARM") => HealthStatus::Alarm,
        Some("WARNING") => HealthStatus::Warning,
        _ => HealthStatus::Ok,
    }
}

fn transition_message(key: &UnitKey, from: Option<HealthStatus>, to: HealthStatus) -> String {
    let unit = &key.station_id;
    match (from, to) {
        (_, HealthStatus::Disconnected) => format!("{unit} communication lost"),
        (Some(HealthStatus::Disconnected), HealthStatus::Ok) => {
            format!("{unit} communication restored")
        }
        (_, HealthStatus::Ok) => format!("{unit} returned to normal"),
        (_, HealthStatus::Alarm) => format!("{unit} entered ALARM state"),
        (Some(HealthStatus::Alarm), HealthStatus::Warning) => {
            format!("{unit} alarm cleared, WARNING remains")
        }
        (_, HealthStatus::Warning) => format!("{unit} entered WARNING state"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PointValue, TelemetryPoint};

    fn snapshot(station: &str, status: &str) -> UnitSnapshot {
        let mut s = UnitSnapshot::new(&UnitKey::new("plant-1", station), Utc::now());
        s.points.insert(
            "status".to_string(),
            TelemetryPoint::new(PointValue::Text(status.to_string())),
        );
        s
    }

    #[test]
    fn test_sequence_emits_only_transitions() {
        let mut tracker = EventTracker::new();
        let now = Utc::now();

        let emitted: Vec<Event> = ["OK", "OK", "WARNING", "WARNING", "ALARM", "OK"]
            .iter()
            .filter_map(|s| tracker.on_snapshot(&snapshot("ahu-1", s), now))
            .collect();

        assert_eq!(emitted.len(), 3);
        assert_eq!(emitted[0].event_type, HealthStatus::Warning);
        assert_eq!(emitted[1].event_type, HealthStatus::Alarm);
        assert_eq!(emitted[2].event_type, HealthStatus::Ok);
        assert_eq!(emitted[2].message, "ahu-1 returned to normal");
    }

    #[test]
    fn test_first_observation_in_alarm_emits() {
        let mut tracker = EventTracker::new();
        let event = tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), Utc::now());
        assert_eq!(event.unwrap().event_type, HealthStatus::Alarm);
    }

    #[test]
    fn test_active_counts_recomputed_wholesale() {
        let mut tracker = EventTracker::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let now = Utc::now();

        tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), now);
        tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), now);
        assert_eq!(tracker.active_counts(&key), ActiveCounts { alarms: 1, warnings: 0 });

        tracker.on_snapshot(&snapshot("ahu-1", "WARNING"), now);
        assert_eq!(tracker.active_counts(&key), ActiveCounts { alarms: 0, warnings: 1 });
    }

    #[test]
    fn test_log_bounded_newest_first() {
        let mut tracker = EventTracker::new();
        let now = Utc::now();

        let mut last_ids = Vec::new();
        for i in 0..1000 {
            let status = if i % 2 == 0 { "ALARM" } else { "OK" };
            let event = tracker.on_snapshot(&snapshot("ahu-1", status), now).unwrap();
            last_ids.push(event.id);
        }

        assert_eq!(tracker.len(), EVENT_LOG_CAPACITY);
        let retained: Vec<Uuid> = tracker.recent(usize::MAX).iter().map(|e| e.id).collect();
        let expected: Vec<Uuid> = last_ids.iter().rev().take(EVENT_LOG_CAPACITY).copied().collect();
        assert_eq!(retained, expected);
    }

    #[test]
    fn test_disconnect_emits_once_and_zeroes_counts() {
        let mut tracker = EventTracker::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let now = Utc::now();

        tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), now);
        let first = tracker.mark_disconnected(&key, now);
        let second = tracker.mark_disconnected(&key, now);

        assert_eq!(first.unwrap().message, "ahu-1 communication lost");
        assert!(second.is_none());
        assert_eq!(tracker.active_counts(&key), ActiveCounts::default());
    }

    #[test]
    fn test_ok_after_disconnect_is_communication_restored() {
        let mut tracker = EventTracker::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let now = Utc::now();

        tracker.on_snapshot(&snapshot("ahu-1", "OK"), now);
        tracker.mark_disconnected(&key, now);
        let event = tracker.on_snapshot(&snapshot("ahu-1", "OK"), now).unwrap();

        assert_eq!(event.event_type, HealthStatus::Ok);
        assert_eq!(event.message, "ahu-1 communication restored");
    }

    #[test]
    fn test_initialize_does_not_emit() {
        let mut tracker = EventTracker::new();
        let units = vec![snapshot("ahu-1", "ALARM"), snapshot("ahu-2", "WARNING")];

        tracker.initialize_from_snapshot(&units);
        assert!(tracker.is_empty());

        // First real message in the same state is not a transition
        assert!(tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), Utc::now()).is_none());
        assert_eq!(
            tracker.last_status(&UnitKey::new("plant-1", "ahu-2")),
            Some(HealthStatus::Warning)
        );
    }

    #[test]
    fn test_reconcile_counts_keeps_last_status() {
        let mut tracker = EventTracker::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let now = Utc::now();

        tracker.on_snapshot(&snapshot("ahu-1", "OK"), now);
        tracker.mark_disconnected(&key, now);
        tracker.update_active_counts_from_snapshot(&[snapshot("ahu-1", "ALARM")]);

        assert_eq!(tracker.last_status(&key), Some(HealthStatus::Disconnected));
        assert_eq!(tracker.active_counts(&key).alarms, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_summary_window() {
        let mut tracker = EventTracker::new();
        let now = Utc::now();

        tracker.on_snapshot(&snapshot("ahu-1", "ALARM"), now - Duration::minutes(90));
        tracker.on_snapshot(&snapshot("ahu-2", "WARNING"), now - Duration::minutes(5));
        tracker.on_snapshot(&snapshot("ahu-3", "ALARM"), now);

        let summary = tracker.summary(now, Duration::minutes(60));
        assert_eq!(summary.active_alarms, 2);
        assert_eq!(summary.active_warnings, 1);
        assert_eq!(summary.recent_alarms, 1);
        assert_eq!(summary.recent_warnings, 1);
        assert_eq!(summary.window_minutes, 60);
    }
}

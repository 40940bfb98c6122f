//! Connectivity monitoring
//!
//! Tracks when each unit was last heard from and detects staleness on a
//! fixed sweep, independently of message arrival. Sweeps are suspended
//! while the transport link itself is down.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::models::UnitKey;

/// Default interval between staleness sweeps
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Per-unit connectivity transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityChange {
    Disconnected(UnitKey),
    Reconnected(UnitKey),
}

#[derive(Debug)]
pub struct ConnectivityMonitor {
    last_seen: HashMap<UnitKey, DateTime<Utc>>,
    connected: HashMap<UnitKey, bool>,
    transport_up: bool,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self {
            last_seen: HashMap::new(),
            connected: HashMap::new(),
            transport_up: true,
        }
    }

    /// Record a fresh message. Returns `Reconnected` when the unit was
    /// previously marked disconnected.
    pub fn record_seen(&mut self, key: &UnitKey, at: DateTime<Utc>) -> Option<ConnectivityChange> {
        self.last_seen.insert(key.clone(), at);

        match self.connected.insert(key.clone(), true) {
            Some(false) => {
                info!(plant_id = %key.plant_id, station_id = %key.station_id, "Unit reconnected");
                Some(ConnectivityChange::Reconnected(key.clone()))
            }
            _ => None,
        }
    }

    /// Flag every unit silent for longer than `timeout_ms`. Each unit is
    /// reported once per transition, not once per sweep.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout_ms: u64) -> Vec<ConnectivityChange> {
        if !self.transport_up {
            debug!("Transport down, connectivity sweep skipped");
            return Vec::new();
        }

        let mut changes = Vec::new();
        for (key, last_seen) in &self.last_seen {
            let silent_ms = (now - *last_seen).num_milliseconds();
            if silent_ms <= timeout_ms as i64 {
                continue;
            }

            let connected = self.connected.entry(key.clone()).or_insert(true);
            if *connected {
                *connected = false;
                warn!(
                    plant_id = %key.plant_id,
                    station_id = %key.station_id,
                    silent_ms,
                    "Unit stale, marking disconnected"
                );
                changes.push(ConnectivityChange::Disconnected(key.clone()));
            }
        }

        changes.sort_by(|a, b| change_key(a).cmp(change_key(b)));
        changes
    }

    /// Bulk transition for a full transport outage
    pub fn mark_all_disconnected(&mut self) -> Vec<UnitKey> {
        let mut flipped: Vec<UnitKey> = self
            .connected
            .iter_mut()
            .filter(|(_, connected)| **connected)
            .map(|(key, connected)| {
                *connected = false;
                key.clone()
            })
            .collect();
        flipped.sort();

        info!(units = flipped.len(), "All units marked disconnected");
        flipped
    }

    pub fn set_transport_up(&mut self, up: bool) {
        if self.transport_up != up {
            info!(transport_up = up, "Connectivity sweeps {}", if up { "resumed" } else { "suspended" });
        }
        self.transport_up = up;
    }

    pub fn transport_up(&self) -> bool {
        self.transport_up
    }

    /// Unknown units count as disconnected
    pub fn is_connected(&self, key: &UnitKey) -> bool {
        self.connected.get(key).copied().unwrap_or(false)
    }

    pub fn last_seen(&self, key: &UnitKey) -> Option<DateTime<Utc>> {
        self.last_seen.get(key).copied()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn change_key(change: &ConnectivityChange) -> &UnitKey {
    match change {
        ConnectivityChange::Disconnected(key) | ConnectivityChange::Reconnected(key) => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const TIMEOUT_MS: u64 = 120_000;

    #[test]
    fn test_stale_unit_disconnects_once() {
        let mut monitor = ConnectivityMonitor::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let t0 = Utc::now();

        monitor.record_seen(&key, t0);
        assert!(monitor.sweep(t0 + Duration::seconds(60), TIMEOUT_MS).is_empty());

        let changes = monitor.sweep(t0 + Duration::seconds(121), TIMEOUT_MS);
        assert_eq!(changes, vec![ConnectivityChange::Disconnected(key.clone())]);
        assert!(!monitor.is_connected(&key));

        // Later sweeps do not repeat the transition
        assert!(monitor.sweep(t0 + Duration::seconds(126), TIMEOUT_MS).is_empty());
        assert!(monitor.sweep(t0 + Duration::seconds(300), TIMEOUT_MS).is_empty());
    }

    #[test]
    fn test_fresh_message_reconnects() {
        let mut monitor = ConnectivityMonitor::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let t0 = Utc::now();

        assert!(monitor.record_seen(&key, t0).is_none());
        monitor.sweep(t0 + Duration::seconds(200), TIMEOUT_MS);

        let change = monitor.record_seen(&key, t0 + Duration::seconds(201));
        assert_eq!(change, Some(ConnectivityChange::Reconnected(key.clone())));
        assert!(monitor.is_connected(&key));
        assert!(monitor.record_seen(&key, t0 + Duration::seconds(202)).is_none());
    }

    #[test]
    fn test_sweep_suspended_while_transport_down() {
        let mut monitor = ConnectivityMonitor::new();
        let key = UnitKey::new("plant-1", "ahu-1");
        let t0 = Utc::now();

        monitor.record_seen(&key, t0);
        monitor.set_transport_up(false);
        assert!(monitor.sweep(t0 + Duration::seconds(500), TIMEOUT_MS).is_empty());
        assert!(monitor.is_connected(&key));

        monitor.set_transport_up(true);
        assert_eq!(monitor.sweep(t0 + Duration::seconds(500), TIMEOUT_MS).len(), 1);
    }

    #[test]
    fn test_mark_all_disconnected() {
        let mut monitor = ConnectivityMonitor::new();
        let a = UnitKey::new("plant-1", "ahu-1");
        let b = UnitKey::new("plant-1", "ahu-2");
        let t0 = Utc::now();

        monitor.record_seen(&a, t0);
        monitor.record_seen(&b, t0);
        monitor.sweep(t0 + Duration::seconds(200), TIMEOUT_MS);
        monitor.record_seen(&b, t0 + Duration::seconds(201));

        // Only b is still connected
        assert_eq!(monitor.mark_all_disconnected(), vec![b.clone()]);
        assert!(!monitor.is_connected(&a));
        assert!(!monitor.is_connected(&b));
        assert!(monitor.mark_all_disconnected().is_empty());
    }
}

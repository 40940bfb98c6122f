//! Point store
//!
//! Latest value/unit/quality per (unit, point key), plus a small bounded
//! ring buffer of recent point updates per unit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::models::{PointValue, TelemetryPoint, UnitKey, UnitSnapshot};

/// Maximum number of point updates kept per unit
pub const MAX_HISTORY_PER_UNIT: usize = 500;

/// One recorded point update
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub point_key: String,
    pub value: PointValue,
}

#[derive(Debug)]
struct UnitEntry {
    snapshot: UnitSnapshot,
    history: VecDeque<HistorySample>,
}

/// Latest known telemetry for every unit
#[derive(Debug, Default)]
pub struct PointStore {
    units: HashMap<UnitKey, UnitEntry>,
    total_updates: u64,
}

impl PointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one point of a unit wholesale and bump the unit timestamp
    pub fn update(
        &mut self,
        key: &UnitKey,
        point_key: &str,
        point: TelemetryPoint,
        at: DateTime<Utc>,
    ) -> &UnitSnapshot {
        self.total_updates += 1;

        let entry = self.units.entry(key.clone()).or_insert_with(|| UnitEntry {
            snapshot: UnitSnapshot::new(key, at),
            history: VecDeque::with_capacity(MAX_HISTORY_PER_UNIT),
        });

        // Remove oldest sample if at capacity
        if entry.history.len() >= MAX_HISTORY_PER_UNIT {
            entry.history.pop_front();
        }
        entry.history.push_back(HistorySample {
            timestamp: at,
            point_key: point_key.to_string(),
            value: point.value.clone(),
        });

        debug!(
            plant_id = %key.plant_id,
            station_id = %key.station_id,
            point = %point_key,
            total = self.total_updates,
            "Applying point update"
        );

        entry.snapshot.points.insert(point_key.to_string(), point);
        entry.snapshot.timestamp = at;
        &entry.snapshot
    }

    pub fn get(&self, key: &UnitKey) -> Option<&UnitSnapshot> {
        self.units.get(key).map(|e| &e.snapshot)
    }

    /// All snapshots, ordered by unit key
    pub fn snapshots(&self) -> Vec<UnitSnapshot> {
        let mut all: Vec<UnitSnapshot> = self.units.values().map(|e| e.snapshot.clone()).collect();
        all.sort_by(|a, b| (&a.plant_id, &a.station_id).cmp(&(&b.plant_id, &b.station_id)));
        all
    }

    /// Last `count` samples for a unit, most recent first
    pub fn history(&self, key: &UnitKey, count: usize) -> Vec<&HistorySample> {
        self.units
            .get(key)
            .map(|e| e.history.iter().rev().take(count).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &UnitKey> {
        self.units.keys()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }
}

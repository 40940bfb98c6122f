//! Operator acknowledgments
//!
//! At most one live acknowledgment per (unit, severity). Records are
//! pruned as soon as the unit's current status stops matching the
//! acknowledged severity, so an ALARM ack never covers a later WARNING.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{AckRecord, AckSeverity, HealthStatus, UnitKey};

#[derive(Debug, Default)]
pub struct AckStore {
    records: HashMap<(UnitKey, AckSeverity), AckRecord>,
    /// Optional JSON file rewritten after every mutation
    path: Option<PathBuf>,
}

impl AckStore {
    /// In-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON file. A missing file starts empty.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            records: HashMap::new(),
            path: Some(path.clone()),
        };

        if !path.exists() {
            info!(path = %path.display(), "No acknowledgment file, starting empty");
            return Ok(store);
        }

        let raw = fs::read_to_string(&path)
            .map_err(|e| AppError::PersistenceError(format!("{}: {}", path.display(), e)))?;
        let records: Vec<AckRecord> = serde_json::from_str(&raw)
            .map_err(|e| AppError::PersistenceError(format!("{}: {}", path.display(), e)))?;

        for record in records {
            let key = UnitKey::new(record.plant_id.clone(), record.station_id.clone());
            store.records.insert((key, record.for_status), record);
        }

        info!(path = %path.display(), records = store.records.len(), "Acknowledgments loaded");
        Ok(store)
    }

    /// Create or replace the acknowledgment for (unit, severity)
    pub fn add(
        &mut self,
        plant_id: &str,
        station_id: &str,
        for_status: AckSeverity,
        operator: &str,
        now: DateTime<Utc>,
    ) -> AckRecord {
        let record = AckRecord {
            id: Uuid::new_v4(),
            plant_id: plant_id.to_string(),
            station_id: station_id.to_string(),
            for_status,
            acknowledged_at: now,
            acknowledged_by: operator.to_string(),
        };

        let replaced = self
            .records
            .insert((UnitKey::new(plant_id, station_id), for_status), record.clone())
            .is_some();

        info!(
            plant_id = %plant_id,
            station_id = %station_id,
            for_status = ?for_status,
            operator = %operator,
            replaced,
            "Acknowledgment recorded"
        );

        self.persist();
        record
    }

    pub fn is_acknowledged(
        &self,
        plant_id: &str,
        station_id: &str,
        for_status: AckSeverity,
    ) -> Option<&AckRecord> {
        self.records
            .get(&(UnitKey::new(plant_id, station_id), for_status))
    }

    /// Remove every record for a unit, regardless of severity
    pub fn clear(&mut self, plant_id: &str, station_id: &str) -> usize {
        let before = self.records.len();
        self.records
            .retain(|(key, _), _| !(key.plant_id == plant_id && key.station_id == station_id));
        let removed = before - self.records.len();

        if removed > 0 {
            debug!(plant_id = %plant_id, station_id = %station_id, removed, "Acknowledgments cleared");
            self.persist();
        }
        removed
    }

    /// Drop records whose severity no longer matches the unit's current status.
    /// Units absent from `current` are left alone.
    pub fn prune_stale(&mut self, current: &HashMap<UnitKey, HealthStatus>) -> Vec<AckRecord> {
        let stale: Vec<(UnitKey, AckSeverity)> = self
            .records
            .keys()
            .filter(|(key, severity)| {
                current
                    .get(key)
                    .map(|status| !severity.matches(*status))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let removed: Vec<AckRecord> = stale
            .iter()
            .filter_map(|k| self.records.remove(k))
            .collect();

        if !removed.is_empty() {
            debug!(removed = removed.len(), "Stale acknowledgments pruned");
            self.persist();
        }
        removed
    }

    pub fn list(&self) -> Vec<&AckRecord> {
        let mut all: Vec<&AckRecord> = self.records.values().collect();
        all.sort_by(|a, b| b.acknowledged_at.cmp(&a.acknowledged_at));
        all
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Best-effort write; failures are logged, never propagated
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let records: Vec<&AckRecord> = self.records.values().collect();
        let result = serde_json::to_string_pretty(&records)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(path, json).map_err(|e| e.to_string()));

        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to persist acknowledgments");
        }
    }
}

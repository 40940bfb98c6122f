//! Health evaluation
//!
//! Derives a unit's operational status from its latest snapshot, the
//! configured thresholds and the current time. Evaluation is pure and is
//! recomputed on every read; results must not be cached without keying on `now`.

use chrono::{DateTime, Utc};

use crate::models::{
    HealthReport, HealthStatus, Quality, Thresholds, UnitSnapshot, HUMIDITY_POINT,
    STATUS_POINT, TEMPERATURE_POINT,
};

/// Evaluate a snapshot. First matching rule wins:
///
/// 1. stale beyond `disconnect_timeout_ms` -> DISCONNECTED (bad count forced to 0)
/// 2. device-reported `status == "ALARM"` -> ALARM
/// 3. temperature/humidity at or above its alarm threshold -> ALARM
/// 4. temperature/humidity at or above its warning threshold -> WARNING
/// 5. any point with BAD quality -> WARNING
/// 6. device-reported `status == "WARNING"` -> WARNING
/// 7. otherwise OK
pub fn evaluate(snapshot: &UnitSnapshot, thresholds: &Thresholds, now: DateTime<Utc>) -> HealthReport {
    let last_update = snapshot.timestamp;

    let age_ms = (now - snapshot.timestamp).num_milliseconds();
    if age_ms > thresholds.disconnect_timeout_ms as i64 {
        return HealthReport {
            status: HealthStatus::Disconnected,
            bad_point_count: 0,
            last_update,
        };
    }

    let bad_point_count = snapshot
        .points
        .values()
        .filter(|p| p.quality == Some(Quality::Bad))
        .count();

    let reported = reported_status(snapshot);

    let alarm = reported == Some("ALARM")
        || exceeds(snapshot, TEMPERATURE_POINT, thresholds.temperature_alarm)
        || exceeds(snapshot, HUMIDITY_POINT, thresholds.humidity_alarm);

    let warning = exceeds(snapshot, TEMPERATURE_POINT, thresholds.temperature_warning)
        || exceeds(snapshot, HUMIDITY_POINT, thresholds.humidity_warning)
        || bad_point_count > 0
        || reported == Some("WARNING");

    let status = if alarm {
        HealthStatus::Alarm
    } else if warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Ok
    };

    HealthReport {
        status,
        bad_point_count,
        last_update,
    }
}

/// Literal value of the device-reported `status` point, if textual
pub fn reported_status(snapshot: &UnitSnapshot) -> Option<&str> {
    snapshot
        .point(STATUS_POINT)
        .and_then(|p| p.value.as_text())
}

/// Inclusive threshold check; missing limits and non-numeric values never trigger
fn exceeds(snapshot: &UnitSnapshot, point_key: &str, limit: Option<f64>) -> bool {
    let Some(limit) = limit else {
        return false;
    };

    snapshot
        .point(point_key)
        .and_then(|p| p.value.as_number())
        .map(|value| value >= limit)
        .unwrap_or(false)
}

//! Data models for AHU telemetry, health, events, acknowledgments and commands
//!
//! Defines the core data structures used throughout the application.
//! Wire-facing types serialize with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Point key carrying the device-reported status
pub const STATUS_POINT: &str = "status";

/// Point key for air temperature (Celsius)
pub const TEMPERATURE_POINT: &str = "temperature";

/// Point key for relative humidity (percentage)
pub const HUMIDITY_POINT: &str = "humidity";

/// Identity of an air-handling unit: (plantId, stationId)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitKey {
    pub plant_id: String,
    pub station_id: String,
}

impl UnitKey {
    pub fn new(plant_id: impl Into<String>, station_id: impl Into<String>) -> Self {
        Self {
            plant_id: plant_id.into(),
            station_id: station_id.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plant_id, self.station_id)
    }
}

/// Raw value of a telemetry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PointValue {
    /// Numeric value usable for threshold rules, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PointValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PointValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Signal quality reported alongside a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// Latest known value of a single point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub value: PointValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<Quality>,
}

impl TelemetryPoint {
    pub fn new(value: PointValue) -> Self {
        Self {
            value,
            unit: None,
            quality: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Complete set of a unit's latest point values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSnapshot {
    pub plant_id: String,
    pub station_id: String,
    /// Time of the most recently applied point update for this unit
    pub timestamp: DateTime<Utc>,
    pub points: HashMap<String, TelemetryPoint>,
}

impl UnitSnapshot {
    pub fn new(key: &UnitKey, timestamp: DateTime<Utc>) -> Self {
        Self {
            plant_id: key.plant_id.clone(),
            station_id: key.station_id.clone(),
            timestamp,
            points: HashMap::new(),
        }
    }

    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.plant_id.clone(), self.station_id.clone())
    }

    pub fn point(&self, key: &str) -> Option<&TelemetryPoint> {
        self.points.get(key)
    }
}

/// Operational health of a unit, ordered by precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Warning,
    Alarm,
    Disconnected,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "OK",
            HealthStatus::Warning => "WARNING",
            HealthStatus::Alarm => "ALARM",
            HealthStatus::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-configurable evaluation thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "crate::validation::validate_threshold_order"))]
pub struct Thresholds {
    #[validate(range(min = 1000, message = "Disconnect timeout must be at least 1000 ms"))]
    pub disconnect_timeout_ms: u64,
    #[serde(default)]
    #[validate(range(min = -50.0, max = 100.0, message = "Temperature threshold must be between -50 and 100°C"))]
    pub temperature_warning: Option<f64>,
    #[serde(default)]
    #[validate(range(min = -50.0, max = 100.0, message = "Temperature threshold must be between -50 and 100°C"))]
    pub temperature_alarm: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Humidity threshold must be between 0 and 100%"))]
    pub humidity_warning: Option<f64>,
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Humidity threshold must be between 0 and 100%"))]
    pub humidity_alarm: Option<f64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            disconnect_timeout_ms: 120_000,
            temperature_warning: Some(28.0),
            temperature_alarm: Some(30.0),
            humidity_warning: Some(70.0),
            humidity_alarm: Some(80.0),
        }
    }
}

/// Result of evaluating a unit snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub bad_point_count: usize,
    pub last_update: DateTime<Utc>,
}

/// Transition event recorded in the global event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub plant_id: String,
    pub station_id: String,
    #[serde(rename = "type")]
    pub event_type: HealthStatus,
    pub message: String,
}

/// Severity an operator can acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckSeverity {
    Alarm,
    Warning,
}

impl AckSeverity {
    pub fn matches(&self, status: HealthStatus) -> bool {
        matches!(
            (self, status),
            (AckSeverity::Alarm, HealthStatus::Alarm) | (AckSeverity::Warning, HealthStatus::Warning)
        )
    }
}

/// Operator acknowledgment of one alarm/warning episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRecord {
    pub id: Uuid,
    pub plant_id: String,
    pub station_id: String,
    pub for_status: AckSeverity,
    pub acknowledged_at: DateTime<Utc>,
    pub acknowledged_by: String,
}

/// Setpoint commands a unit accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    FanStatus,
    DamperPosition,
}

/// Operator request to change a unit setpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[validate(length(min = 1, max = 64, message = "plantId must be 1-64 characters"))]
    pub plant_id: String,
    #[validate(length(min = 1, max = 64, message = "stationId must be 1-64 characters"))]
    pub station_id: String,
    pub command: CommandKind,
    pub value: serde_json::Value,
}

impl CommandRequest {
    pub fn key(&self) -> UnitKey {
        UnitKey::new(self.plant_id.clone(), self.station_id.clone())
    }
}

/// Command body for the per-unit HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInput {
    pub command: CommandKind,
    pub value: serde_json::Value,
}

/// Input DTO for acknowledging an alarm/warning
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AckInput {
    pub for_status: AckSeverity,
    /// Defaults to the configured operator name
    #[validate(length(min = 1, max = 64, message = "Operator name must be 1-64 characters"))]
    pub operator: Option<String>,
}

/// Input DTO for pushing telemetry over HTTP instead of the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryInput {
    pub points: HashMap<String, TelemetryPoint>,
}

/// Terminal outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    Success,
    Error,
    Timeout,
}

/// Result delivered exactly once per issued command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: Uuid,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Immediate acknowledgment returned when a command is issued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub command_id: Uuid,
}

/// Unit snapshot enriched with derived state, for the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitView {
    #[serde(flatten)]
    pub snapshot: UnitSnapshot,
    pub health: HealthReport,
    pub connected: bool,
    pub alarm_acknowledged: bool,
    pub warning_acknowledged: bool,
}

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Full state, sent on (re)connect
    #[serde(rename = "snapshot")]
    Snapshot(Vec<UnitSnapshot>),
    /// Incremental change of a single unit
    #[serde(rename = "update")]
    Update(UnitSnapshot),
    /// New transition event
    #[serde(rename = "event")]
    Event(Event),
    /// Client request to execute a command
    #[serde(rename = "command:execute")]
    CommandExecute(CommandRequest),
    /// Command accepted, result follows later
    #[serde(rename = "command:ack")]
    CommandAck(CommandAck),
    /// Terminal command outcome
    #[serde(rename = "command:result")]
    CommandResult(CommandResult),
    /// Connection acknowledgment
    #[serde(rename = "connected")]
    Connected { client_id: String },
    /// Error message
    #[serde(rename = "error")]
    Error { message: String },
    /// Heartbeat/ping
    #[serde(rename = "ping")]
    Ping,
    /// Heartbeat/pong response
    #[serde(rename = "pong")]
    Pong,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub transport_connected: bool,
    pub units_tracked: usize,
    pub pending_commands: usize,
}

//! Input validation module
//!
//! Validates thresholds, commands, acknowledgments and HTTP telemetry input.

use tracing::{debug, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{AppError, AppResult};
use crate::models::{AckInput, CommandKind, CommandRequest, TelemetryInput, Thresholds};

/// Setpoint constraints accepted by the units
pub struct CommandConstraints;

impl CommandConstraints {
    /// Damper position range (percentage open)
    pub const DAMPER_MIN: f64 = 0.0;
    pub const DAMPER_MAX: f64 = 100.0;

    /// Accepted textual fan states
    pub const FAN_STATES: [&'static str; 2] = ["ON", "OFF"];
}

/// Schema-level check: each warning limit must not exceed its alarm limit
pub fn validate_threshold_order(thresholds: &Thresholds) -> Result<(), ValidationError> {
    let pairs = [
        (thresholds.temperature_warning, thresholds.temperature_alarm),
        (thresholds.humidity_warning, thresholds.humidity_alarm),
    ];

    for (warning, alarm) in pairs {
        if let (Some(w), Some(a)) = (warning, alarm) {
            if w > a {
                let mut err = ValidationError::new("threshold_order");
                err.message = Some("Warning threshold must not exceed alarm threshold".into());
                return Err(err);
            }
        }
    }

    Ok(())
}

/// Validate a thresholds replacement
pub fn validate_thresholds(thresholds: &Thresholds) -> AppResult<()> {
    if let Err(errors) = thresholds.validate() {
        let message = flatten_errors(&errors);
        warn!(errors = %message, "Threshold validation failed");
        return Err(AppError::ValidationError(message));
    }

    debug!("Threshold validation passed");
    Ok(())
}

/// Validate a setpoint command, including the value for its kind
pub fn validate_command(request: &CommandRequest) -> AppResult<()> {
    if let Err(errors) = request.validate() {
        let message = flatten_errors(&errors);
        warn!(errors = %message, "Command validation failed");
        return Err(AppError::ValidationError(message));
    }

    match request.command {
        CommandKind::FanStatus => validate_fan_status(&request.value),
        CommandKind::DamperPosition => validate_damper_position(&request.value),
    }
}

/// Validate an acknowledgment request
pub fn validate_ack(input: &AckInput) -> AppResult<()> {
    input
        .validate()
        .map_err(|errors| AppError::ValidationError(flatten_errors(&errors)))
}

/// Validate telemetry pushed over HTTP
pub fn validate_telemetry(input: &TelemetryInput) -> AppResult<()> {
    if input.points.is_empty() {
        return Err(AppError::ValidationError(
            "At least one point is required".to_string(),
        ));
    }

    if let Some(bad) = input.points.keys().find(|k| k.is_empty() || k.contains('/')) {
        return Err(AppError::ValidationError(format!(
            "Invalid point key '{}'",
            bad
        )));
    }

    Ok(())
}

fn validate_fan_status(value: &serde_json::Value) -> AppResult<()> {
    match value {
        serde_json::Value::Bool(_) => Ok(()),
        serde_json::Value::String(s) if CommandConstraints::FAN_STATES.contains(&s.as_str()) => Ok(()),
        other => Err(AppError::ValidationError(format!(
            "fan_status must be one of {:?} or a boolean, got {}",
            CommandConstraints::FAN_STATES,
            other
        ))),
    }
}

fn validate_damper_position(value: &serde_json::Value) -> AppResult<()> {
    let position = value.as_f64().ok_or_else(|| {
        AppError::ValidationError("damper_position must be a number".to_string())
    })?;

    if !position.is_finite()
        || position < CommandConstraints::DAMPER_MIN
        || position > CommandConstraints::DAMPER_MAX
    {
        return Err(AppError::ValidationError(format!(
            "damper_position {} out of valid range [{}, {}]",
            position,
            CommandConstraints::DAMPER_MIN,
            CommandConstraints::DAMPER_MAX
        )));
    }

    Ok(())
}

fn flatten_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .map(|(field, errors)| {
            let msgs: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.message.as_ref().map(|c| c.as_ref()))
                .collect();
            format!("{}: {}", field, msgs.join(", "))
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AckSeverity, PointValue, TelemetryPoint};
    use serde_json::json;
    use std::collections::HashMap;

    fn command(kind: CommandKind, value: serde_json::Value) -> CommandRequest {
        CommandRequest {
            plant_id: "plant-1".into(),
            station_id: "ahu-1".into(),
            command: kind,
            value,
        }
    }

    #[test]
    fn test_default_thresholds_valid() {
        assert!(validate_thresholds(&Thresholds::default()).is_ok());
    }

    #[test]
    fn test_warning_above_alarm_rejected() {
        let thresholds = Thresholds {
            temperature_warning: Some(32.0),
            temperature_alarm: Some(30.0),
            ..Thresholds::default()
        };
        assert!(matches!(
            validate_thresholds(&thresholds),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_short_disconnect_timeout_rejected() {
        let thresholds = Thresholds {
            disconnect_timeout_ms: 10,
            ..Thresholds::default()
        };

        let result = validate_thresholds(&thresholds);
        if let Err(AppError::ValidationError(msg)) = result {
            assert!(msg.contains("disconnect_timeout_ms"));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_fan_status_values() {
        assert!(validate_command(&command(CommandKind::FanStatus, json!("ON"))).is_ok());
        assert!(validate_command(&command(CommandKind::FanStatus, json!(false))).is_ok());
        assert!(validate_command(&command(CommandKind::FanStatus, json!("SPIN"))).is_err());
        assert!(validate_command(&command(CommandKind::FanStatus, json!(1))).is_err());
    }

    #[test]
    fn test_damper_position_range() {
        assert!(validate_command(&command(CommandKind::DamperPosition, json!(0))).is_ok());
        assert!(validate_command(&command(CommandKind::DamperPosition, json!(100.0))).is_ok());
        assert!(validate_command(&command(CommandKind::DamperPosition, json!(100.5))).is_err());
        assert!(validate_command(&command(CommandKind::DamperPosition, json!("50"))).is_err());
    }

    #[test]
    fn test_empty_station_rejected() {
        let mut req = command(CommandKind::FanStatus, json!("OFF"));
        req.station_id.clear();
        assert!(validate_command(&req).is_err());
    }

    #[test]
    fn test_ack_operator_length() {
        let ok = AckInput {
            for_status: AckSeverity::Alarm,
            operator: None,
        };
        let empty = AckInput {
            for_status: AckSeverity::Alarm,
            operator: Some(String::new()),
        };
        assert!(validate_ack(&ok).is_ok());
        assert!(validate_ack(&empty).is_err());
    }

    #[test]
    fn test_telemetry_input() {
        let mut points = HashMap::new();
        assert!(validate_telemetry(&TelemetryInput { points: points.clone() }).is_err());

        points.insert("temperature".to_string(), TelemetryPoint::new(PointValue::Number(21.0)));
        assert!(validate_telemetry(&TelemetryInput { points: points.clone() }).is_ok());

        points.insert("a/b".to_string(), TelemetryPoint::new(PointValue::Number(1.0)));
        assert!(validate_telemetry(&TelemetryInput { points }).is_err());
    }
}

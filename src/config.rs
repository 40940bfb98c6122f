//! Configuration management module
//!
//! Loads environment-based configuration with defaults. Thresholds loaded
//! here are only the initial value; they are hot-swapped at runtime.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::models::Thresholds;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid value for environment variable {key}")]
    ParseError { key: String },

    #[error("Environment variable {key} must be greater than zero")]
    ZeroValue { key: String },
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Simulated AHU fleet settings
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    pub enabled: bool,
    pub plants: usize,
    pub units_per_plant: usize,
    /// Interval in milliseconds between telemetry rounds
    pub interval_ms: u64,
    /// Probability that a command gets no response at all
    pub response_drop_rate: f64,
}

/// Engine timing settings
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    pub sweep_interval_ms: u64,
    pub command_timeout_secs: u64,
}

/// Acknowledgment settings
#[derive(Debug, Clone, Deserialize)]
pub struct AckSettings {
    /// Operator name used when a request does not name one
    pub operator: String,
    pub store_path: Option<PathBuf>,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub simulator: SimulatorSettings,
    pub monitor: MonitorSettings,
    pub thresholds: Thresholds,
    pub ack: AckSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        let defaults = Thresholds::default();

        Ok(Self {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port: parse_var("SERVER_PORT", 8080)?,
            },
            simulator: SimulatorSettings {
                enabled: parse_var("SIMULATOR_ENABLED", true)?,
                plants: parse_var("SIMULATOR_PLANTS", 1)?,
                units_per_plant: parse_var("SIMULATOR_UNITS_PER_PLANT", 3)?,
                interval_ms: parse_nonzero("SIMULATOR_INTERVAL_MS", 2000)?,
                response_drop_rate: parse_var("SIMULATOR_RESPONSE_DROP_RATE", 0.1)?,
            },
            monitor: MonitorSettings {
                sweep_interval_ms: parse_nonzero("MONITOR_SWEEP_INTERVAL_MS", 5000)?,
                command_timeout_secs: parse_nonzero("COMMAND_TIMEOUT_SECS", 10)?,
            },
            thresholds: Thresholds {
                disconnect_timeout_ms: parse_var(
                    "DISCONNECT_TIMEOUT_MS",
                    defaults.disconnect_timeout_ms,
                )?,
                temperature_warning: parse_optional("TEMPERATURE_WARNING", defaults.temperature_warning)?,
                temperature_alarm: parse_optional("TEMPERATURE_ALARM", defaults.temperature_alarm)?,
                humidity_warning: parse_optional("HUMIDITY_WARNING", defaults.humidity_warning)?,
                humidity_alarm: parse_optional("HUMIDITY_ALARM", defaults.humidity_alarm)?,
            },
            ack: AckSettings {
                operator: env::var("ACK_OPERATOR").unwrap_or_else(|_| "operator".into()),
                store_path: env::var("ACK_STORE_PATH")
                    .ok()
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from),
            },
        })
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, SettingsError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SettingsError::ParseError { key: key.to_string() }),
        Err(_) => Ok(default),
    }
}

/// Intervals and timeouts; zero would stall or panic the timer tasks
fn parse_nonzero(key: &str, default: u64) -> Result<u64, SettingsError> {
    match parse_var(key, default)? {
        0 => Err(SettingsError::ZeroValue { key: key.to_string() }),
        value => Ok(value),
    }
}

/// Unset keeps the default; an empty value disables the threshold
fn parse_optional(key: &str, default: Option<f64>) -> Result<Option<f64>, SettingsError> {
    match env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SettingsError::ParseError { key: key.to_string() }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-wide; keep all env mutation in one test
    #[test]
    fn test_settings_from_env() {
        for key in [
            "SERVER_HOST",
            "SERVER_PORT",
            "SIMULATOR_INTERVAL_MS",
            "MONITOR_SWEEP_INTERVAL_MS",
            "COMMAND_TIMEOUT_SECS",
            "TEMPERATURE_ALARM",
            "HUMIDITY_WARNING",
            "ACK_STORE_PATH",
        ] {
            env::remove_var(key);
        }

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.monitor.command_timeout_secs, 10);
        assert_eq!(settings.thresholds.disconnect_timeout_ms, 120_000);
        assert_eq!(settings.thresholds.temperature_alarm, Some(30.0));
        assert!(settings.ack.store_path.is_none());

        env::set_var("SERVER_PORT", "3000");
        env::set_var("TEMPERATURE_ALARM", "32.5");
        env::set_var("HUMIDITY_WARNING", "");

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.thresholds.temperature_alarm, Some(32.5));
        assert_eq!(settings.thresholds.humidity_warning, None);

        env::set_var("SERVER_PORT", "not-a-port");
        assert!(matches!(
            Settings::from_env(),
            Err(SettingsError::ParseError { key }) if key == "SERVER_PORT"
        ));

        env::remove_var("SERVER_PORT");

        for key in [
            "MONITOR_SWEEP_INTERVAL_MS",
            "SIMULATOR_INTERVAL_MS",
            "COMMAND_TIMEOUT_SECS",
        ] {
            env::set_var(key, "0");
            assert!(matches!(
                Settings::from_env(),
                Err(SettingsError::ZeroValue { key: k }) if k == key
            ));
            env::remove_var(key);
        }
        assert_eq!(Settings::from_env().unwrap().monitor.sweep_interval_ms, 5000);

        env::remove_var("TEMPERATURE_ALARM");
        env::remove_var("HUMIDITY_WARNING");
    }
}

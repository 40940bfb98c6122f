//! Simulated AHU fleet
//!
//! Publishes realistic point updates for a configurable set of units onto
//! the transport, and answers setpoint commands the way field controllers
//! do: after a short delay, occasionally with an error, sometimes not at
//! all. Replace with a broker-backed transport to monitor real units.
//!
//! The generated data follows realistic patterns including:
//! - Slow sinusoidal drift of return air temperature
//! - Humidity inversely correlated with temperature
//! - Occasional heat excursions that push a unit into WARNING/ALARM
//! - Occasional BAD quality readings and silent periods (lost comms)

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};
use std::sync::Arc;
use tokio::time::{interval, sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::SimulatorSettings;
use crate::models::{
    CommandKind, CommandStatus, PointValue, Quality, TelemetryPoint, UnitKey, HUMIDITY_POINT,
    STATUS_POINT, TEMPERATURE_POINT,
};
use crate::transport::{
    point_topic, response_topic, CommandPayload, CommandResponsePayload, Transport,
};

pub const FAN_STATUS_POINT: &str = "fan_status";
pub const DAMPER_POSITION_POINT: &str = "damper_position";
pub const SUPPLY_AIR_TEMPERATURE_POINT: &str = "supply_air_temperature";

/// Chance per tick that a reading is flagged BAD
const BAD_QUALITY_RATE: f64 = 0.02;
/// Chance per tick that a unit stops reporting for a while
const SILENCE_RATE: f64 = 0.002;
/// Chance per tick that a unit starts a heat excursion
const EXCURSION_RATE: f64 = 0.005;
/// Chance that a delivered command is rejected by the controller
const COMMAND_ERROR_RATE: f64 = 0.05;

/// One simulated air handling unit
#[derive(Debug, Clone)]
pub struct SimulatedUnit {
    pub key: UnitKey,
    base_temperature: f64,
    base_humidity: f64,
    fan_on: bool,
    damper_position: f64,
    /// Remaining ticks without publishing
    silent_ticks: u32,
    /// Remaining ticks of elevated temperature
    excursion_ticks: u32,
}

impl SimulatedUnit {
    fn new(key: UnitKey, offset: f64) -> Self {
        Self {
            key,
            base_temperature: 22.0 + offset,
            base_humidity: 50.0 - offset * 2.0,
            fan_on: true,
            damper_position: 40.0,
            silent_ticks: 0,
            excursion_ticks: 0,
        }
    }

    /// Apply a setpoint; returns an error message for values the unit refuses
    fn apply(&mut self, command: CommandKind, value: &serde_json::Value) -> Result<(), String> {
        match command {
            CommandKind::FanStatus => {
                self.fan_on = match value {
                    serde_json::Value::Bool(on) => *on,
                    serde_json::Value::String(s) if s == "ON" => true,
                    serde_json::Value::String(s) if s == "OFF" => false,
                    other => return Err(format!("Unsupported fan state {}", other)),
                };
            }
            CommandKind::DamperPosition => {
                let position = value
                    .as_f64()
                    .ok_or_else(|| "Damper position must be numeric".to_string())?;
                self.damper_position = position.clamp(0.0, 100.0);
            }
        }
        Ok(())
    }
}

/// Fake AHU fleet that produces telemetry and answers commands
pub struct FakeAhuFleet {
    interval_ms: u64,
    response_drop_rate: f64,
    units: Vec<SimulatedUnit>,
    /// Time drift factor for gradual changes
    drift_factor: f64,
    temp_noise: Normal<f64>,
    humidity_noise: Normal<f64>,
    rng: StdRng,
}

impl FakeAhuFleet {
    /// Create a fleet of `plants * units_per_plant` units
    pub fn new(settings: &SimulatorSettings) -> Result<Self, NormalError> {
        Self::with_rng(settings, StdRng::from_entropy())
    }

    pub fn with_rng(settings: &SimulatorSettings, rng: StdRng) -> Result<Self, NormalError> {
        let units = (1..=settings.plants)
            .flat_map(|plant| {
                (1..=settings.units_per_plant).map(move |station| {
                    SimulatedUnit::new(
                        UnitKey::new(format!("plant-{}", plant), format!("ahu-{}", station)),
                        station as f64 * 0.5,
                    )
                })
            })
            .collect::<Vec<_>>();

        info!(
            units = units.len(),
            interval_ms = settings.interval_ms,
            "Initializing simulated AHU fleet"
        );

        Ok(Self {
            interval_ms: settings.interval_ms,
            response_drop_rate: settings.response_drop_rate,
            units,
            drift_factor: 0.0,
            temp_noise: Normal::new(0.0, 0.4)?,
            humidity_noise: Normal::new(0.0, 1.5)?,
            rng,
        })
    }

    pub fn units(&self) -> &[SimulatedUnit] {
        &self.units
    }

    /// Produce one round of point updates as (topic, point) pairs
    pub fn tick(&mut self) -> Vec<(String, TelemetryPoint)> {
        self.drift_factor += 0.01;
        if self.drift_factor > std::f64::consts::PI * 2.0 {
            self.drift_factor = 0.0;
        }
        let temp_drift = (self.drift_factor * 0.5).sin() * 2.0;

        let mut out = Vec::new();
        for i in 0..self.units.len() {
            if self.units[i].silent_ticks > 0 {
                self.units[i].silent_ticks -= 1;
                continue;
            }
            if self.rng.gen::<f64>() < SILENCE_RATE {
                let ticks = self.rng.gen_range(30..90);
                warn!(unit = %self.units[i].key, ticks, "Simulating lost communication");
                self.units[i].silent_ticks = ticks;
                continue;
            }
            if self.units[i].excursion_ticks == 0 && self.rng.gen::<f64>() < EXCURSION_RATE {
                self.units[i].excursion_ticks = self.rng.gen_range(10..40);
                info!(unit = %self.units[i].key, "Simulating heat excursion");
            }

            let temp_noise = self.temp_noise.sample(&mut self.rng);
            let humidity_noise = self.humidity_noise.sample(&mut self.rng);
            let bad_quality = self.rng.gen::<f64>() < BAD_QUALITY_RATE;

            let unit = &mut self.units[i];
            let excursion = if unit.excursion_ticks > 0 {
                unit.excursion_ticks -= 1;
                9.0
            } else {
                0.0
            };
            // Airflow pulls the return air toward the supply temperature
            let cooling = if unit.fan_on {
                unit.damper_position / 100.0 * 2.0
            } else {
                -1.5
            };

            let temperature =
                round1((unit.base_temperature + temp_drift + excursion - cooling + temp_noise).clamp(5.0, 50.0));
            let humidity =
                round1((unit.base_humidity - temp_drift * 2.0 + humidity_noise).clamp(10.0, 95.0));
            let supply_air = round1(if unit.fan_on { 13.0 + temp_noise } else { temperature });

            let status = if excursion > 0.0 && temperature >= 32.0 {
                "ALARM"
            } else if !unit.fan_on {
                "WARNING"
            } else {
                "OK"
            };

            let quality = if bad_quality { Quality::Bad } else { Quality::Good };
            let key = unit.key.clone();

            out.push((
                point_topic(&key, TEMPERATURE_POINT),
                TelemetryPoint::new(PointValue::Number(temperature))
                    .with_unit("C")
                    .with_quality(quality),
            ));
            out.push((
                point_topic(&key, HUMIDITY_POINT),
                TelemetryPoint::new(PointValue::Number(humidity))
                    .with_unit("%")
                    .with_quality(Quality::Good),
            ));
            out.push((
                point_topic(&key, SUPPLY_AIR_TEMPERATURE_POINT),
                TelemetryPoint::new(PointValue::Number(supply_air)).with_unit("C"),
            ));
            out.push((
                point_topic(&key, FAN_STATUS_POINT),
                TelemetryPoint::new(PointValue::Text(
                    if unit.fan_on { "ON" } else { "OFF" }.to_string(),
                )),
            ));
            out.push((
                point_topic(&key, DAMPER_POSITION_POINT),
                TelemetryPoint::new(PointValue::Number(unit.damper_position)).with_unit("%"),
            ));
            out.push((
                point_topic(&key, STATUS_POINT),
                TelemetryPoint::new(PointValue::Text(status.to_string())),
            ));
        }
        out
    }

    /// Apply a received command; `None` means the response is dropped
    pub fn handle_command(&mut self, payload: &CommandPayload) -> Option<CommandResponsePayload> {
        let key = UnitKey::new(payload.plant_id.clone(), payload.station_id.clone());

        if self.rng.gen::<f64>() < self.response_drop_rate {
            debug!(command_id = %payload.command_id, unit = %key, "Dropping command response");
            return None;
        }

        let outcome = match self.units.iter_mut().find(|u| u.key == key) {
            None => Err(format!("Unknown unit {}", key)),
            Some(_) if self.rng.gen::<f64>() < COMMAND_ERROR_RATE => {
                Err("Controller rejected setpoint".to_string())
            }
            Some(unit) => unit.apply(payload.command, &payload.value),
        };

        let (status, message) = match outcome {
            Ok(()) => (CommandStatus::Success, None),
            Err(message) => (CommandStatus::Error, Some(message)),
        };

        Some(CommandResponsePayload {
            command_id: payload.command_id,
            status,
            message,
            timestamp: Utc::now(),
        })
    }

    /// Run the fleet until the transport closes
    pub async fn run(mut self, transport: Arc<dyn Transport>) {
        info!("Starting simulated telemetry loop");

        let mut commands = transport.subscribe("+/+/commands/set");
        let mut tick_interval = interval(Duration::from_millis(self.interval_ms));
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    tick_count += 1;
                    let points = self.tick();
                    for (topic, point) in points {
                        let payload = match serde_json::to_value(&point) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(topic = %topic, error = %e, "Failed to encode point");
                                continue;
                            }
                        };
                        if let Err(e) = transport.publish(&topic, payload) {
                            debug!(topic = %topic, error = %e, "Telemetry not published");
                        }
                    }
                    if tick_count % 300 == 0 {
                        self.shift_baselines();
                    }
                }
                msg = commands.recv() => {
                    let Some(msg) = msg else {
                        info!("Transport closed, simulator exiting");
                        break;
                    };
                    self.respond(&transport, msg.topic, msg.payload);
                }
            }
        }
    }

    fn respond(&mut self, transport: &Arc<dyn Transport>, topic: String, payload: serde_json::Value) {
        let command = match serde_json::from_value::<CommandPayload>(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Malformed command payload");
                return;
            }
        };

        let Some(response) = self.handle_command(&command) else {
            return;
        };

        let key = UnitKey::new(command.plant_id, command.station_id);
        let delay = Duration::from_millis(self.rng.gen_range(100..1500));
        let transport = Arc::clone(transport);

        tokio::spawn(async move {
            sleep(delay).await;
            match serde_json::to_value(&response) {
                Ok(payload) => {
                    if let Err(e) = transport.publish(&response_topic(&key), payload) {
                        debug!(unit = %key, error = %e, "Command response not published");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode command response"),
            }
        });
    }

    /// Every few minutes, slight baseline shift
    fn shift_baselines(&mut self) {
        for unit in &mut self.units {
            unit.base_temperature =
                (unit.base_temperature + self.rng.gen_range(-1.0..1.0)).clamp(18.0, 27.0);
            unit.base_humidity =
                (unit.base_humidity + self.rng.gen_range(-5.0..5.0)).clamp(35.0, 65.0);
        }
        info!("Environmental baseline shift simulated");
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

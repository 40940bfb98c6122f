//! AHU Monitor
//!
//! Real-time backend for monitoring air handling units: ingests point
//! telemetry, derives per-unit health, tracks status transitions and
//! connectivity, and correlates setpoint commands with device responses.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod ack;
mod config;
mod connectivity;
mod correlator;
mod error;
mod events;
mod handlers;
mod health;
mod models;
mod simulator;
mod state;
mod store;
mod transport;
mod validation;
mod websocket;

use crate::ack::AckStore;
use crate::config::Settings;
use crate::correlator::CommandCorrelator;
use crate::handlers::DefaultOperator;
use crate::simulator::FakeAhuFleet;
use crate::state::{spawn_connectivity_monitor, AppState};
use crate::transport::{spawn_transport_listener, InProcessBus};
use crate::validation::validate_thresholds;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ahu_monitor=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().context("Failed to load configuration")?;
    validate_thresholds(&settings.thresholds).context("Invalid initial thresholds")?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    info!("Starting AHU monitor");
    info!("Binding server to {}", bind_address);

    // Acknowledgments survive restarts when a store path is configured
    let acks = match &settings.ack.store_path {
        Some(path) => AckStore::load(path)
            .with_context(|| format!("Failed to load acknowledgments from {}", path.display()))?,
        None => {
            warn!("ACK_STORE_PATH not set, acknowledgments are kept in memory only");
            AckStore::new()
        }
    };

    // Transport and command correlation
    let bus = Arc::new(InProcessBus::default());
    let correlator = CommandCorrelator::new(
        bus.clone(),
        Duration::from_secs(settings.monitor.command_timeout_secs),
    );

    // Shared application state
    let app_state = Arc::new(RwLock::new(AppState::new(
        correlator,
        settings.thresholds.clone(),
        acks,
    )));

    spawn_transport_listener(app_state.clone(), bus.clone());
    spawn_connectivity_monitor(app_state.clone(), settings.monitor.sweep_interval_ms);

    // ---------------------------------------------------------------------
    // Simulated fleet
    // ---------------------------------------------------------------------
    if settings.simulator.enabled {
        let fleet = FakeAhuFleet::new(&settings.simulator)
            .context("Failed to initialize simulated fleet")?;
        let transport = bus.clone();
        actix_rt::spawn(async move {
            fleet.run(transport).await;
        });
    } else {
        info!("Simulator disabled, waiting for external telemetry");
    }

    // ---------------------------------------------------------------------
    // HTTP + WebSocket server
    // ---------------------------------------------------------------------
    let operator = DefaultOperator(settings.ack.operator.clone());

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(operator.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await
    .context("HTTP server error")
}

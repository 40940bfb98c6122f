//! HTTP request handlers
//!
//! Thin REST surface over the engine. All logic lives in the state and
//! its components; handlers validate, lock, call and serialize.

use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    AckInput, CommandInput, CommandRequest, HealthCheck, TelemetryInput, Thresholds, UnitKey,
};
use crate::state::{execute_command, SharedState};
use crate::validation::{validate_ack, validate_telemetry, validate_thresholds};
use crate::websocket::WsSession;

/// Default operator name for acknowledgments
#[derive(Debug, Clone)]
pub struct DefaultOperator(pub String);

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Health check
            .route("/health", web::get().to(health_check))
            // Units and telemetry
            .route("/units", web::get().to(list_units))
            .route("/units/{plant}/{station}", web::get().to(get_unit))
            .route("/units/{plant}/{station}/history", web::get().to(get_unit_history))
            .route("/telemetry/{plant}/{station}", web::post().to(ingest_telemetry))
            // Events
            .route("/events", web::get().to(list_events))
            .route("/events/summary", web::get().to(event_summary))
            // Thresholds
            .route("/thresholds", web::get().to(get_thresholds))
            .route("/thresholds", web::put().to(put_thresholds))
            // Acknowledgments
            .route("/acks", web::get().to(list_acks))
            .route("/units/{plant}/{station}/ack", web::post().to(acknowledge))
            .route("/units/{plant}/{station}/ack", web::delete().to(clear_acks))
            // Commands
            .route("/units/{plant}/{station}/commands", web::post().to(issue_command))
            .route("/commands/{id}", web::get().to(get_command_result)),
    )
    // WebSocket endpoint
    .route("/ws", web::get().to(websocket_handler));
}

/// Health check endpoint
///
/// GET /api/health
pub async fn health_check(state: web::Data<SharedState>) -> Result<HttpResponse, AppError> {
    let state = state.read().await;

    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        uptime_seconds: state.uptime_seconds(),
        transport_connected: state.transport_up(),
        units_tracked: state.store().len(),
        pending_commands: state.correlator().pending_count(),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// GET /api/units
pub async fn list_units(state: web::Data<SharedState>) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.unit_views(Utc::now())))
}

/// GET /api/units/{plant}/{station}
pub async fn get_unit(
    state: web::Data<SharedState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let key = unit_key(path);
    let state = state.read().await;

    state
        .unit_view(&key, Utc::now())
        .map(|view| HttpResponse::Ok().json(view))
        .ok_or_else(|| AppError::NotFound(format!("Unit {} not found", key)))
}

/// Query parameters for bounded lists
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// GET /api/units/{plant}/{station}/history?limit=100
pub async fn get_unit_history(
    state: web::Data<SharedState>,
    path: web::Path<(String, String)>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, AppError> {
    let key = unit_key(path);
    let limit = query.limit.unwrap_or(100);
    if limit == 0 || limit > 1000 {
        return Err(AppError::ValidationError(
            "Limit must be between 1 and 1000".to_string(),
        ));
    }

    let state = state.read().await;
    if state.store().get(&key).is_none() {
        return Err(AppError::NotFound(format!("Unit {} not found", key)));
    }

    Ok(HttpResponse::Ok().json(state.store().history(&key, limit)))
}

/// Ingest telemetry over HTTP
///
/// POST /api/telemetry/{plant}/{station}
///
/// For devices that do not publish on the bus; runs the same pipeline.
pub async fn ingest_telemetry(
    state: web::Data<SharedState>,
    path: web::Path<(String, String)>,
    body: web::Json<TelemetryInput>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let key = unit_key(path);
    validate_telemetry(&body)?;

    let input = body.into_inner();
    let point_count = input.points.len();
    let now = Utc::now();

    let mut events = Vec::new();
    {
        let mut state = state.write().await;
        for (point_key, point) in input.points {
            events.extend(state.ingest(&key, &point_key, point, now));
        }
    }

    info!(
        correlation_id = %correlation_id,
        unit = %key,
        points = point_count,
        events = events.len(),
        "Telemetry ingested over HTTP"
    );

    Ok(HttpResponse::Created().json(IngestResponse {
        success: true,
        points: point_count,
        events: events.len(),
        correlation_id,
    }))
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    points: usize,
    events: usize,
    correlation_id: String,
}

/// GET /api/events?limit=50
pub async fn list_events(
    state: web::Data<SharedState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, AppError> {
    let limit = query.limit.unwrap_or(usize::MAX);
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.recent_events(limit)))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub minutes: Option<i64>,
}

/// GET /api/events/summary?minutes=60
pub async fn event_summary(
    state: web::Data<SharedState>,
    query: web::Query<SummaryQuery>,
) -> Result<HttpResponse, AppError> {
    let minutes = query.minutes.unwrap_or(60);
    if !(1..=1440).contains(&minutes) {
        return Err(AppError::ValidationError(
            "Window must be between 1 and 1440 minutes".to_string(),
        ));
    }

    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.event_summary(Utc::now(), minutes)))
}

/// GET /api/thresholds
pub async fn get_thresholds(state: web::Data<SharedState>) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.thresholds()))
}

/// PUT /api/thresholds
pub async fn put_thresholds(
    state: web::Data<SharedState>,
    body: web::Json<Thresholds>,
) -> Result<HttpResponse, AppError> {
    validate_thresholds(&body)?;

    let thresholds = body.into_inner();
    let mut state = state.write().await;
    state.set_thresholds(thresholds, Utc::now());

    Ok(HttpResponse::Ok().json(state.thresholds()))
}

/// GET /api/acks
pub async fn list_acks(state: web::Data<SharedState>) -> Result<HttpResponse, AppError> {
    let state = state.read().await;
    Ok(HttpResponse::Ok().json(state.acks().list()))
}

/// POST /api/units/{plant}/{station}/ack
pub async fn acknowledge(
    state: web::Data<SharedState>,
    operator: web::Data<DefaultOperator>,
    path: web::Path<(String, String)>,
    body: web::Json<AckInput>,
) -> Result<HttpResponse, AppError> {
    let key = unit_key(path);
    validate_ack(&body)?;

    let input = body.into_inner();
    let operator = input.operator.unwrap_or_else(|| operator.0.clone());

    let record = state
        .write()
        .await
        .acknowledge(&key, input.for_status, &operator, Utc::now())?;

    Ok(HttpResponse::Created().json(record))
}

/// DELETE /api/units/{plant}/{station}/ack
pub async fn clear_acks(
    state: web::Data<SharedState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let key = unit_key(path);
    let mut state = state.write().await;
    let removed = state.acks_mut().clear(&key.plant_id, &key.station_id);

    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

/// Issue a setpoint command
///
/// POST /api/units/{plant}/{station}/commands
///
/// Returns 202 with the command id; the outcome arrives later as
/// `command:result` on the WebSocket and via GET /api/commands/{id}.
pub async fn issue_command(
    state: web::Data<SharedState>,
    path: web::Path<(String, String)>,
    body: web::Json<CommandInput>,
) -> Result<HttpResponse, AppError> {
    let key = unit_key(path);
    let input = body.into_inner();

    let ack = execute_command(
        state.get_ref(),
        CommandRequest {
            plant_id: key.plant_id,
            station_id: key.station_id,
            command: input.command,
            value: input.value,
        },
    )
    .await?;

    Ok(HttpResponse::Accepted().json(ack))
}

/// GET /api/commands/{id}
pub async fn get_command_result(
    state: web::Data<SharedState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let raw = path.into_inner();
    let command_id = Uuid::parse_str(&raw)
        .map_err(|_| AppError::BadRequest(format!("Invalid command id: {}", raw)))?;

    let state = state.read().await;
    if let Some(result) = state.command_result(&command_id) {
        return Ok(HttpResponse::Ok().json(result));
    }

    if state.is_in_flight(&command_id) {
        return Ok(HttpResponse::Accepted().json(serde_json::json!({
            "commandId": command_id,
            "status": "PENDING",
            // None once the device answered but the outcome is not recorded yet
            "deadline": state.correlator().deadline(&command_id)
        })));
    }

    Err(AppError::NotFound(format!("Command {} not found", command_id)))
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<SharedState>,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    let ws_session = WsSession::new(client_id, state.get_ref().clone());

    actix_web_actors::ws::start(ws_session, &req, stream)
}

fn unit_key(path: web::Path<(String, String)>) -> UnitKey {
    let (plant, station) = path.into_inner();
    UnitKey::new(plant, station)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ack::AckStore;
    use crate::correlator::{CommandCorrelator, DEFAULT_COMMAND_TIMEOUT};
    use crate::state::AppState;
    use crate::transport::InProcessBus;
    use actix_web::{test, App};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn shared_state() -> SharedState {
        let bus = Arc::new(InProcessBus::default());
        let correlator = CommandCorrelator::new(bus, DEFAULT_COMMAND_TIMEOUT);
        Arc::new(RwLock::new(AppState::new(
            correlator,
            Thresholds::default(),
            AckStore::new(),
        )))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .app_data(web::Data::new(DefaultOperator("operator".into())))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = app!(shared_state());

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_ingest_then_read_unit() {
        let app = app!(shared_state());

        let req = test::TestRequest::post()
            .uri("/api/telemetry/plant-1/ahu-1")
            .set_json(serde_json::json!({
                "points": {
                    "temperature": {"value": 31.0, "unit": "C"},
                    "humidity": {"value": 50.0, "unit": "%"}
                }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        let req = test::TestRequest::get()
            .uri("/api/units/plant-1/ahu-1")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["health"]["status"], "ALARM");
        assert_eq!(body["connected"], true);
        assert_eq!(body["plantId"], "plant-1");
    }

    #[actix_web::test]
    async fn test_unknown_unit_is_404() {
        let app = app!(shared_state());

        let req = test::TestRequest::get()
            .uri("/api/units/plant-9/ahu-9")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_invalid_thresholds_rejected() {
        let app = app!(shared_state());

        let req = test::TestRequest::put()
            .uri("/api/thresholds")
            .set_json(serde_json::json!({
                "disconnectTimeoutMs": 60000,
                "temperatureWarning": 35.0,
                "temperatureAlarm": 30.0
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_acknowledge_uses_default_operator() {
        let state = shared_state();
        state.write().await.ingest(
            &UnitKey::new("plant-1", "ahu-1"),
            "status",
            crate::models::TelemetryPoint::new(crate::models::PointValue::Text("ALARM".into())),
            Utc::now(),
        );
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/units/plant-1/ahu-1/ack")
            .set_json(serde_json::json!({ "forStatus": "ALARM" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["acknowledgedBy"], "operator");
        assert_eq!(state.read().await.acks().len(), 1);
    }

    #[actix_web::test]
    async fn test_acknowledge_other_severity_conflicts() {
        let state = shared_state();
        state.write().await.ingest(
            &UnitKey::new("plant-1", "ahu-1"),
            "status",
            crate::models::TelemetryPoint::new(crate::models::PointValue::Text("OK".into())),
            Utc::now(),
        );
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/units/plant-1/ahu-1/ack")
            .set_json(serde_json::json!({ "forStatus": "ALARM" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), 409);
        assert!(state.read().await.acks().is_empty());

        let req = test::TestRequest::get()
            .uri("/api/units/plant-1/ahu-1")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["alarmAcknowledged"], false);
    }

    #[actix_web::test]
    async fn test_issue_command_returns_accepted() {
        let app = app!(shared_state());

        let req = test::TestRequest::post()
            .uri("/api/units/plant-1/ahu-1/commands")
            .set_json(serde_json::json!({ "command": "damper_position", "value": 45 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let body: serde_json::Value = test::read_body_json(resp).await;
        let id = body["commandId"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/commands/{}", id))
            .to_request();
        let pending: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending["status"], "PENDING");
    }

    #[actix_web::test]
    async fn test_issue_invalid_command_rejected() {
        let app = app!(shared_state());

        let req = test::TestRequest::post()
            .uri("/api/units/plant-1/ahu-1/commands")
            .set_json(serde_json::json!({ "command": "fan_status", "value": "FAST" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }
}

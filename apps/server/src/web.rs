use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDateTime;
use climate_protocol::ZoneId;
use climate_scheduler::entry::{EntryId, EntryUpdate, NewScheduleEntry};
use climate_scheduler::mode::TrackedMode;
use climate_scheduler::service::ClimateService;
use climate_scheduler::ClimateError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct WebState {
    pub service: Arc<ClimateService>,
}

pub fn router(service: Arc<ClimateService>) -> Router {
    Router::new()
        .route("/api/zones", get(list_zones))
        .route("/api/zones/:zone", get(zone_status))
        .route("/api/zones/:zone/mode", post(set_mode))
        .route("/api/zones/:zone/preview", get(preview))
        .route(
            "/api/zones/:zone/schedules",
            get(list_entries).put(replace_zone).delete(clear_zone),
        )
        .route("/api/schedules", post(create_entry))
        .route(
            "/api/schedules/:id",
            get(get_entry).patch(update_entry).delete(delete_entry),
        )
        .route("/api/timezone", get(get_timezone).put(set_timezone))
        .route("/api/settings", get(settings))
        .layer(TraceLayer::new_for_http())
        .with_state(WebState { service })
}

/// Error body in the same `success` envelope as every other response.
pub struct ApiError(ClimateError);

impl From<ClimateError> for ApiError {
    fn from(e: ClimateError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ClimateError::InvalidScheduleEntry(_) | ClimateError::InvalidTimezone(_) => StatusCode::BAD_REQUEST,
            ClimateError::NotFound(_) => StatusCode::NOT_FOUND,
            ClimateError::DataIntegrityViolation { .. } => StatusCode::CONFLICT,
            ClimateError::ControllerUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ClimateError::ControllerTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ClimateError::Store(_) | ClimateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn success<T: Serialize>(data: T) -> ApiResult {
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn list_zones(State(state): State<WebState>) -> ApiResult {
    let mut statuses = Vec::new();
    for zone in state.service.zones().await? {
        statuses.push(state.service.zone_status(zone).await?);
    }
    success(statuses)
}

async fn zone_status(State(state): State<WebState>, Path(zone): Path<u32>) -> ApiResult {
    success(state.service.zone_status(ZoneId(zone)).await?)
}

#[derive(Deserialize)]
pub struct ModeRequest {
    mode: TrackedMode,
}

async fn set_mode(
    State(state): State<WebState>,
    Path(zone): Path<u32>,
    Json(request): Json<ModeRequest>,
) -> ApiResult {
    let applied = state.service.set_mode(ZoneId(zone), request.mode).await?;
    success(json!({ "mode": request.mode, "applied": applied }))
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    /// Local wall-clock instant; defaults to now.
    at: Option<NaiveDateTime>,
}

async fn preview(
    State(state): State<WebState>,
    Path(zone): Path<u32>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult {
    let zone = ZoneId(zone);
    let selection = match query.at {
        Some(at) => state.service.scheduled_temperature(zone, at).await?,
        None => state.service.current_scheduled_temperature(zone).await?,
    };
    success(selection)
}

async fn list_entries(State(state): State<WebState>, Path(zone): Path<u32>) -> ApiResult {
    success(state.service.list_entries(ZoneId(zone)).await?)
}

async fn replace_zone(
    State(state): State<WebState>,
    Path(zone): Path<u32>,
    Json(entries): Json<Vec<NewScheduleEntry>>,
) -> ApiResult {
    success(state.service.replace_zone(ZoneId(zone), entries).await?)
}

async fn clear_zone(State(state): State<WebState>, Path(zone): Path<u32>) -> ApiResult {
    let removed = state.service.clear_zone(ZoneId(zone)).await?;
    success(json!({ "removed": removed }))
}

async fn create_entry(State(state): State<WebState>, Json(entry): Json<NewScheduleEntry>) -> ApiResult {
    success(state.service.create_entry(entry).await?)
}

async fn get_entry(State(state): State<WebState>, Path(id): Path<EntryId>) -> ApiResult {
    success(state.service.get_entry(id).await?)
}

async fn update_entry(
    State(state): State<WebState>,
    Path(id): Path<EntryId>,
    Json(update): Json<EntryUpdate>,
) -> ApiResult {
    success(state.service.update_entry(id, update).await?)
}

async fn delete_entry(State(state): State<WebState>, Path(id): Path<EntryId>) -> ApiResult {
    state.service.delete_entry(id).await?;
    success(Value::Null)
}

#[derive(Deserialize)]
pub struct TimezoneRequest {
    timezone: Option<String>,
}

async fn get_timezone(State(state): State<WebState>) -> ApiResult {
    success(json!({ "timezone": state.service.timezone().await.name() }))
}

async fn set_timezone(State(state): State<WebState>, Json(request): Json<TimezoneRequest>) -> ApiResult {
    let tz = state.service.reconfigure_timezone(request.timezone.as_deref()).await?;
    success(json!({ "timezone": tz.name() }))
}

/// Entry rules a client needs to build valid schedules.
async fn settings(State(state): State<WebState>) -> ApiResult {
    let rules = state.service.rules();
    success(json!({
        "slot_minutes": rules.grid.minutes(),
        "min_temperature": rules.min_temperature,
        "max_temperature": rules.max_temperature,
        "timezone": state.service.timezone().await.name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use chrono::{TimeZone, Utc};
    use climate_protocol::{ClimateController, ControllerError, DeviceMode};
    use climate_scheduler::config::ClimateConfig;
    use climate_scheduler::store::MemoryStore;
    use climate_scheduler::time_source::ManualClock;
    use tower::ServiceExt;

    struct NullDevice;

    #[async_trait]
    impl ClimateController for NullDevice {
        async fn apply_temperature(&self, _zone: ZoneId, _celsius: f64) -> Result<(), ControllerError> {
            Ok(())
        }

        async fn set_mode(&self, _zone: ZoneId, _mode: DeviceMode) -> Result<(), ControllerError> {
            Ok(())
        }
    }

    async fn app() -> Router {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 6, 12, 30, 0).unwrap()));
        let service = ClimateService::open(
            ClimateConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullDevice),
            clock,
        )
        .await
        .unwrap();
        router(Arc::new(service))
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn schedule_crud_and_mode() {
        let app = app().await;
        let entry = json!({
            "zone": 1, "schedule_type": "ALL_DAY", "time": "08:00:00", "temperature": 20.0
        });
        let (status, body) = call(&app, Method::POST, "/api/schedules", Some(entry)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = call(&app, Method::POST, "/api/zones/1/mode", Some(json!({ "mode": "auto" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["applied"]["temperature"], 20.0);

        let (_, body) = call(&app, Method::GET, "/api/zones/1", None).await;
        assert_eq!(body["data"]["mode"], "auto");
        assert_eq!(body["data"]["device_mode"], "heat");

        let (status, _) = call(&app, Method::DELETE, &format!("/api/schedules/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::GET, &format!("/api/schedules/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let app = app().await;
        let off_grid = json!({
            "zone": 1, "schedule_type": "ALL_DAY", "time": "08:10:00", "temperature": 20.0
        });
        let (status, body) = call(&app, Method::POST, "/api/schedules", Some(off_grid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("grid"));

        let (status, body) = call(&app, Method::GET, "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["slot_minutes"], 15);
        assert_eq!(body["data"]["min_temperature"], 5.0);
        assert_eq!(body["data"]["max_temperature"], 30.0);
        assert_eq!(body["data"]["timezone"], "UTC");

        let (status, _) =
            call(&app, Method::PUT, "/api/timezone", Some(json!({ "timezone": "Atlantis/Capital" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn preview_and_timezone() {
        let app = app().await;
        let entries = json!([
            { "zone": 2, "schedule_type": "WEEKDAY_WEEKEND", "day_key": "WEEKDAY", "time": "07:00:00", "temperature": 21.0 },
            { "zone": 2, "schedule_type": "WEEKDAY_WEEKEND", "day_key": "WEEKEND", "time": "09:00:00", "temperature": 19.0 }
        ]);
        let (status, _) = call(&app, Method::PUT, "/api/zones/2/schedules", Some(entries)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/api/zones/2/preview?at=2025-01-11T10:07:00", None).await;
        assert_eq!(body["data"]["temperature"], 19.0);
        assert_eq!(body["data"]["slot"], "09:00:00");

        let (_, body) = call(&app, Method::PUT, "/api/timezone", Some(json!({ "timezone": "Europe/Berlin" }))).await;
        assert_eq!(body["data"]["timezone"], "Europe/Berlin");
        let (_, body) = call(&app, Method::GET, "/api/timezone", None).await;
        assert_eq!(body["data"]["timezone"], "Europe/Berlin");
    }
}

//! HTTP surface of the daemon.
//!
//! Call-level failures (bad input, embedder down) are `ok=false` with an
//! HTTP error status. A legitimate negative verdict — unmatched face,
//! outside the fence — is `ok=true` with `admitted=false` and a reason, so
//! clients never conflate "access denied" with "system broken".

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose;
use base64::Engine as _;
use chrono::Local;
use serde::{Deserialize, Serialize};

use turnstile_core::{Coordinate, EnrollError, EnrollMode, LocationFix, Site, TemplateStore};

use crate::attendance::{self, AttendanceLog};
use crate::db::Database;
use crate::engine::{Engine, EngineError};
use crate::sites::{SiteError, SiteRegistry};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine<Database>>,
    pub store: Arc<TemplateStore<Database>>,
    pub sites: Arc<SiteRegistry>,
    pub attendance: Arc<AttendanceLog>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/enroll", post(enroll))
        .route("/api/recognize", post(recognize))
        .route("/api/faces", get(faces))
        .route("/api/reset", post(reset))
        .route("/api/sites", get(get_sites).put(put_sites))
        .route("/api/attendance.csv", get(attendance_csv))
        .with_state(state)
}

/// Call-level failure: serialized as `{ok: false, msg}` with an error status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    msg: String,
}

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::BAD_REQUEST, msg: msg.into() }
    }

    fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, msg: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "ok": false, "msg": self.msg }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            // Dependency failure: the model, not the request.
            EngineError::EmbeddingFailed(_) => StatusCode::BAD_GATEWAY,
            EngineError::NoUsableFrames => StatusCode::BAD_REQUEST,
            EngineError::Enroll(EnrollError::Sink(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Enroll(_) => StatusCode::BAD_REQUEST,
            EngineError::Match(_) => StatusCode::BAD_REQUEST,
        };
        ApiError { status, msg: e.to_string() }
    }
}

impl From<SiteError> for ApiError {
    fn from(e: SiteError) -> Self {
        match &e {
            SiteError::Geo(_) | SiteError::BadRadius { .. } => ApiError::bad_request(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}

/// Decode a base64 image, tolerating an optional `data:image/...;base64,`
/// prefix as sent by browser capture clients.
fn decode_image(b64: &str) -> Result<Vec<u8>, ApiError> {
    let b64 = match b64.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:image") => rest,
        _ => b64,
    };
    general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|e| ApiError::bad_request(format!("invalid base64 image: {e}")))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    module: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        module: "turnstiled",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    code: String,
    images: Vec<String>,
    /// Re-enrollment: drop the identity's existing templates first.
    #[serde(default)]
    replace: bool,
}

#[derive(Serialize)]
pub struct EnrollResponse {
    ok: bool,
    msg: String,
    enrolled_count: usize,
}

async fn enroll(
    State(state): State<AppState>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    let code = req.code.trim();
    if code.is_empty() || req.images.is_empty() {
        return Err(ApiError::bad_request("missing code/images"));
    }

    let images = req
        .images
        .iter()
        .map(|s| decode_image(s))
        .collect::<Result<Vec<_>, _>>()?;

    let mode = if req.replace { EnrollMode::ReplaceAll } else { EnrollMode::Append };
    let outcome = state.engine.enroll(code, images, mode).await?;

    Ok(Json(EnrollResponse {
        ok: true,
        msg: format!("enrolled ({} frames dropped)", outcome.dropped),
        enrolled_count: outcome.enrolled,
    }))
}

fn default_kind() -> String {
    "checkin".to_string()
}

#[derive(Deserialize)]
pub struct RecognizeRequest {
    image: String,
    #[serde(default = "default_kind", rename = "type")]
    kind: String,
    lat: f64,
    lng: f64,
    accuracy: Option<f64>,
    threshold: Option<f32>,
}

#[derive(Serialize)]
pub struct GeofenceBody {
    within: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    nearest_site: Option<String>,
    distance_m: Option<f64>,
    reason: String,
}

#[derive(Serialize)]
pub struct RecognizeResponse {
    ok: bool,
    admitted: bool,
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    score: f32,
    threshold: f32,
    period: &'static str,
    reason: String,
    geofence: GeofenceBody,
}

async fn recognize(
    State(state): State<AppState>,
    Json(req): Json<RecognizeRequest>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let image = decode_image(&req.image)?;
    let coord = Coordinate::new(req.lat, req.lng)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    // A missing accuracy field is treated as trusted (0 m), matching what
    // capture clients send when the platform reports none.
    let fix = LocationFix::new(coord, req.accuracy.unwrap_or(0.0));

    let kind = req.kind.trim().to_lowercase();
    let verdict = state
        .engine
        .recognize(image, fix, &kind, req.threshold)
        .await?;

    Ok(Json(RecognizeResponse {
        ok: true,
        admitted: verdict.admitted,
        // MatchResult carries the identity exactly when it matched.
        matched: verdict.identity.is_some(),
        name: verdict.identity,
        score: round3(verdict.score),
        threshold: verdict.threshold_used,
        period: attendance::period(Local::now().time()),
        reason: verdict.reason.to_string(),
        geofence: GeofenceBody {
            within: verdict.geofence.within,
            nearest_site: verdict.geofence.nearest_site,
            distance_m: verdict.geofence.distance_m.map(round1),
            reason: verdict.geofence.reason.to_string(),
        },
    }))
}

#[derive(Serialize)]
pub struct FacesResponse {
    ok: bool,
    size: usize,
    codes: Vec<String>,
}

async fn faces(State(state): State<AppState>) -> Json<FacesResponse> {
    let codes = state.store.identities().await;
    Json(FacesResponse { ok: true, size: codes.len(), codes })
}

async fn reset(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .store
        .clear()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "ok": true, "msg": "cleared" })))
}

#[derive(Serialize)]
pub struct SitesResponse {
    ok: bool,
    sites: Vec<Site>,
}

async fn get_sites(State(state): State<AppState>) -> Json<SitesResponse> {
    Json(SitesResponse { ok: true, sites: state.sites.snapshot().await })
}

#[derive(Deserialize)]
pub struct PutSitesRequest {
    sites: Vec<Site>,
}

async fn put_sites(
    State(state): State<AppState>,
    Json(req): Json<PutSitesRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let size = state.sites.replace(req.sites).await?;
    Ok(Json(serde_json::json!({ "ok": true, "size": size })))
}

async fn attendance_csv(State(state): State<AppState>) -> Result<Response, ApiError> {
    let csv = state
        .attendance
        .read_csv()
        .await
        .map_err(|e| ApiError::internal(format!("cannot read attendance log: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"attendance.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}

fn round3(v: f32) -> f32 {
    (v * 1000.0).round() / 1000.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

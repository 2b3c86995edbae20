//! HTTP API: dictionary reads, live preview, admin writes, metrics and the
//! LINE profile passthrough.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::line::{LineCapability, LineError, LineProfile};
use crate::metrics::MetricsSnapshot;
use crate::translate::orchestrator::{FieldError, PreviewRequest, PreviewResponse};
use crate::translate::service::TranslationService;
use crate::translate::store::{PutOutcome, ReviewItem, StoreError};
use crate::translate::{Language, Role};

pub struct AppState {
    pub service: Arc<TranslationService>,
    pub line: Arc<dyn LineCapability>,
    /// `None` rejects every admin call.
    pub admin_token: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/translations/preview", post(preview))
        .route("/translations/commit", post(commit))
        .route("/translations/:language", get(read_dictionary))
        .route("/translations/:language/reviews", get(list_reviews))
        .route("/translations/:language/reinitialize", post(reinitialize))
        .route("/translations/:language/:key", put(put_override))
        .route("/metrics", get(metrics))
        .route("/profile", get(profile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unknown language: {0}")]
    UnknownLanguage(String),
    #[error("validation failed")]
    Invalid(Vec<FieldError>),
    #[error("missing or invalid admin token")]
    Unauthorized,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Line(#[from] LineError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Invalid(errors) => (StatusCode::UNPROCESSABLE_ENTITY, json!({ "errors": errors })),
            ApiError::Store(StoreError::EmptyKey) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "errors": [FieldError::new("key", "must not be empty")] }),
            ),
            ApiError::Store(StoreError::EmptyValue { key, .. }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "errors": [FieldError::new("value", format!("{key}: must not be empty"))] }),
            ),
            ApiError::Store(e @ StoreError::RoleConflict { .. }) => {
                (StatusCode::CONFLICT, json!({ "error": e.to_string() }))
            }
            ApiError::Store(e) => {
                warn!(error = %e, "store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": e.to_string() }))
            }
            ApiError::Line(LineError::NotLoggedIn) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": LineError::NotLoggedIn.to_string() }))
            }
            ApiError::Line(e) => {
                warn!(error = %e, "LINE request failed");
                (StatusCode::BAD_GATEWAY, json!({ "error": e.to_string() }))
            }
            e @ ApiError::UnknownLanguage(_) => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
            e @ ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, json!({ "error": e.to_string() })),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_language(raw: String) -> Result<Language, ApiError> {
    raw.parse().map_err(|_| ApiError::UnknownLanguage(raw))
}

/// Malformed or incomplete JSON bodies become a single `body` field error.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::Invalid(vec![FieldError::new("body", rejection.body_text())]))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state.admin_token.as_deref().ok_or(ApiError::Unauthorized)?;
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;
    if presented.trim() == expected {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Serialize)]
struct DataBody<T> {
    data: T,
}

async fn read_dictionary(
    State(state): State<Arc<AppState>>,
    Path(language): Path<String>,
) -> Result<Json<DataBody<HashMap<String, String>>>, ApiError> {
    let language = parse_language(language)?;
    let data = state.service.dictionary(language).await?;
    Ok(Json(DataBody { data }))
}

async fn preview(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let request = json_body(body)?;
    request.validate().map_err(ApiError::Invalid)?;
    Ok(Json(state.service.preview(&request).await))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Committed {
    commit_id: Uuid,
    #[serde(flatten)]
    preview: PreviewResponse,
}

async fn commit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<PreviewRequest>, JsonRejection>,
) -> Result<Json<Committed>, ApiError> {
    authorize(&state, &headers)?;
    let request = json_body(body)?;
    request.validate().map_err(ApiError::Invalid)?;

    let commit_id = Uuid::new_v4();
    let preview = state.service.commit(&request).await?;
    info!(%commit_id, key = %request.key, outcome = ?preview.outcome, "commit persisted");
    Ok(Json(Committed { commit_id, preview }))
}

#[derive(Deserialize)]
struct OverrideBody {
    value: String,
    #[serde(default)]
    role: Role,
}

#[derive(Serialize)]
struct OverrideResult {
    result: PutOutcome,
}

async fn put_override(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((language, key)): Path<(String, String)>,
    body: Result<Json<OverrideBody>, JsonRejection>,
) -> Result<Json<OverrideResult>, ApiError> {
    authorize(&state, &headers)?;
    let language = parse_language(language)?;
    let body = json_body(body)?;
    if body.value.trim().is_empty() {
        return Err(ApiError::Invalid(vec![FieldError::new("value", "must not be empty")]));
    }

    let result = state
        .service
        .set_override(language, key.clone(), body.role, body.value)
        .await?;
    info!(%language, key = %key, ?result, "manual override stored");
    Ok(Json(OverrideResult { result }))
}

#[derive(Serialize)]
struct ReinitializeResult {
    count: usize,
}

async fn reinitialize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(language): Path<String>,
    body: Result<Json<HashMap<String, String>>, JsonRejection>,
) -> Result<Json<ReinitializeResult>, ApiError> {
    authorize(&state, &headers)?;
    let language = parse_language(language)?;
    let entries = json_body(body)?;
    let count = state.service.reinitialize(language, entries).await?;
    info!(%language, count, "dictionary reinitialized");
    Ok(Json(ReinitializeResult { count }))
}

async fn list_reviews(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(language): Path<String>,
) -> Result<Json<DataBody<Vec<ReviewItem>>>, ApiError> {
    authorize(&state, &headers)?;
    let language = parse_language(language)?;
    let data = state.service.pending_reviews(language).await?;
    Ok(Json(DataBody { data }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.service.metrics().summary())
}

async fn profile(State(state): State<Arc<AppState>>) -> Result<Json<LineProfile>, ApiError> {
    Ok(Json(state.line.profile().await?))
}

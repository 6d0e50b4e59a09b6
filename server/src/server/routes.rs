//! HTTP route handlers for the map view API

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::websocket::ws_handler;
use crate::engine::{EngineError, EventOutcome, MapView};
use crate::layers::Annotation;
use crate::protocol::ViewEvent;

/// Error response for the view API
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<EngineError> for ApiErrorResponse {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code().to_string(),
            error: e.to_string(),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.code.as_str() {
            "unknown_layer" | "unknown_feature" | "unknown_source" => StatusCode::NOT_FOUND,
            "invalid_coordinate" | "invalid_config" => StatusCode::BAD_REQUEST,
            "shut_down" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Sources whose last query failed
    failed_sources: usize,
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let failed = state.engine.current_view().await.failures.len();
    Json(HealthResponse {
        status: if failed == 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        failed_sources: failed,
    })
}

/// GET /api/view - Current render-ready view
async fn get_view(State(state): State<AppState>) -> Json<MapView> {
    Json(state.engine.current_view().await)
}

/// GET /api/annotations - User annotations in creation order
async fn list_annotations(State(state): State<AppState>) -> Json<Vec<Annotation>> {
    Json(state.engine.annotations().await)
}

/// POST /api/events - Forward one view event
async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<ViewEvent>,
) -> Result<Json<EventOutcome>, ApiErrorResponse> {
    let name = event.name();
    let outcome = state.engine.handle_event(event).await.map_err(|e| {
        tracing::debug!("Rejected {} event: {}", name, e);
        ApiErrorResponse::from(e)
    })?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

/// PUT /api/layers/:name/visibility
async fn set_visibility(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<VisibilityRequest>,
) -> Result<Json<EventOutcome>, ApiErrorResponse> {
    state.engine.set_visible(&name, body.visible).await?;
    Ok(Json(EventOutcome::Visibility {
        layer: name,
        visible: body.visible,
    }))
}

/// POST /api/sources/:name/refresh - Re-issue one source's query
async fn refresh_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<EventOutcome>), ApiErrorResponse> {
    state.engine.refresh_source(&name)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EventOutcome::RefreshScheduled { source: name }),
    ))
}

/// Build the view API and WebSocket routes
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/api/view", get(get_view))
        .route("/api/annotations", get(list_annotations))
        .route("/api/events", post(post_event))
        .route("/api/layers/:name/visibility", put(set_visibility))
        .route("/api/sources/:name/refresh", post(refresh_source))
        .with_state(state)
}

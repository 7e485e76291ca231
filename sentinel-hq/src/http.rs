/**
 * API REST SENTINEL - Lecture des métriques pour le dashboard
 *
 * RÔLE :
 * Expose en JSON ce que l'ingest a écrit dans le store : sources connues,
 * derniers échantillons, état courant des services.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum (port 8080 par défaut), lecture seule
 * - Routes : /servers, /metrics/{source_id}, /servers/{source_id}/services, /health
 * - Erreur store → 500 { "error": "..." }
 * - CORS permissif : Allow-Origin *, préflight OPTIONS → 204 sans toucher aux handlers
 */

use crate::health::{HealthTracker, HqHealth};
use crate::models::{SampleRow, ServerStatus, ServiceStatus};
use crate::store::{LogStore, StoreError};
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use tracing::error;

const ALLOW_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, Authorization, Accept, Origin, Cache-Control, X-Requested-With";
const ALLOW_METHODS: &str = "GET, POST, PUT, OPTIONS";

pub struct AppState<S> {
    pub store: Arc<S>,
    pub health: HealthTracker,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            health: self.health.clone(),
        }
    }
}

/// Store failure as `500 {"error": "..."}`
pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("[http] store error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    response
}

pub fn build_router<S: LogStore>(app_state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(get_health::<S>))
        .route("/servers", get(list_servers::<S>))
        .route("/servers/{source_id}/services", get(get_service_status::<S>))
        .route("/metrics/{source_id}", get(get_metrics::<S>))
        .with_state(app_state)
        .layer(middleware::from_fn(cors))
}

// GET /health (compteurs ingest)
async fn get_health<S: LogStore>(State(app): State<AppState<S>>) -> Json<HqHealth> {
    Json(app.health.get_health())
}

// GET /servers (liveness, plus récent d'abord)
async fn list_servers<S: LogStore>(
    State(app): State<AppState<S>>,
) -> Result<Json<Vec<ServerStatus>>, ApiError> {
    Ok(Json(app.store.list_sources().await?))
}

// GET /metrics/{source_id} (100 derniers échantillons)
async fn get_metrics<S: LogStore>(
    State(app): State<AppState<S>>,
    Path(source_id): Path<String>,
) -> Result<Json<Vec<SampleRow>>, ApiError> {
    Ok(Json(app.store.recent_samples(&source_id).await?))
}

// GET /servers/{source_id}/services (dernier état par service)
async fn get_service_status<S: LogStore>(
    State(app): State<AppState<S>>,
    Path(source_id): Path<String>,
) -> Result<Json<Vec<ServiceStatus>>, ApiError> {
    Ok(Json(app.store.latest_resource_states(&source_id).await?))
}

//! HTTP surface: image upload and hosting, sharing and the bridge socket.

use crate::error::ApiError;
use crate::relay::ws_handler;
use crate::state::{AppState, ShareRequest, ShareResponse, UploadResponse};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    let max_upload = state.config.max_upload_bytes;
    let upload = post(upload_image)
        .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
        .layer::<_, std::convert::Infallible>(RequestBodyLimitLayer::new(max_upload));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/upload", upload)
        .route("/api/share", post(share_image))
        .route("/images/{id}", get(get_image))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> &'static str {
    "MemeForge server - POST images to /api/upload, bot bridges connect at /ws"
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub images: usize,
    pub bridges: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        images: state.image_count(),
        bridges: state.bridge_count(),
    })
}

/// Store a PNG or JPEG sent as the raw request body.
async fn upload_image(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let uploaded = state.store_image(body)?;
    Ok((StatusCode::CREATED, Json(uploaded)))
}

async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let image = state
        .image(id)
        .ok_or_else(|| ApiError::NotFound(format!("image {id}")))?;
    Ok((
        [
            (header::CONTENT_TYPE, image.mime),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        image.bytes,
    ))
}

async fn share_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, ApiError> {
    state.share(request).map(Json)
}

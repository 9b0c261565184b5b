//! REST surface over the instance manager.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use previewd_common::{StartRequest, StartResponse, StopResponse};
use tower_http::trace::TraceLayer;

use crate::application::services::InstanceManager;
use crate::domain::InstanceError;

pub fn router(manager: InstanceManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/instances", get(list_instances).post(start_instance))
        .route(
            "/instances/{app_id}",
            get(instance_status).delete(stop_instance),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn start_instance(
    State(manager): State<InstanceManager>,
    Json(request): Json<StartRequest>,
) -> impl IntoResponse {
    match manager
        .try_start(&request.app_id, &request.app_name, &request.files)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)),
        Err(err) => (status_for(&err), Json(StartResponse::failed(err.to_string()))),
    }
}

async fn list_instances(State(manager): State<InstanceManager>) -> impl IntoResponse {
    Json(manager.list().await)
}

async fn instance_status(
    State(manager): State<InstanceManager>,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    match manager.status(&app_id).await {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(StartResponse::failed(
                InstanceError::NotFound(app_id).to_string(),
            )),
        )
            .into_response(),
    }
}

async fn stop_instance(
    State(manager): State<InstanceManager>,
    Path(app_id): Path<String>,
) -> impl IntoResponse {
    let stopped = manager.stop(&app_id).await;
    let code = if stopped {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (code, Json(StopResponse { stopped }))
}

fn status_for(err: &InstanceError) -> StatusCode {
    match err {
        InstanceError::InvalidAppId(_) => StatusCode::BAD_REQUEST,
        InstanceError::StartInProgress(_) | InstanceError::Stopping(_) => StatusCode::CONFLICT,
        InstanceError::NotFound(_) => StatusCode::NOT_FOUND,
        InstanceError::PortPoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

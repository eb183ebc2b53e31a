use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::responses::ApiResult;
use super::AppState;
use crate::models::*;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.recordings.scheduler();
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "scheduler_running": scheduler.is_running(),
        "jobs_count": scheduler.trigger_count().await,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// Stations API
pub async fn list_stations(State(state): State<AppState>) -> ApiResult<Json<Vec<Station>>> {
    Ok(Json(state.recordings.list_stations().await?))
}

pub async fn create_station(
    State(state): State<AppState>,
    Json(payload): Json<StationCreateRequest>,
) -> ApiResult<(StatusCode, Json<Station>)> {
    let station = state.recordings.create_station(payload).await?;
    Ok((StatusCode::CREATED, Json(station)))
}

pub async fn delete_station(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    state.recordings.delete_station(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Recordings API
pub async fn list_recordings(State(state): State<AppState>) -> ApiResult<Json<RecordingListResponse>> {
    Ok(Json(state.recordings.list_recordings().await?))
}

pub async fn schedule_recording(
    State(state): State<AppState>,
    Json(payload): Json<ScheduleRecordingRequest>,
) -> ApiResult<(StatusCode, Json<RecordingView>)> {
    let view = state.recordings.schedule_recording(payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_recording(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<RecordingView>> {
    Ok(Json(state.recordings.get_recording(id).await?))
}

pub async fn delete_recording(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    state.recordings.delete_recording(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<RecorderStats>> {
    Ok(Json(state.recordings.stats().await?))
}

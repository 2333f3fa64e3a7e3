//! HTTP处理器

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use opd_core::{CreateAssignmentRequest, QueueAssignment, RoomFilter, RoomStats, SweepReport, WaitTimeInfo};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;

/// 等待列表查询参数
#[derive(Debug, Deserialize)]
pub struct WaitingQuery {
    pub room_id: Option<String>,
}

/// 叫号请求
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CallNextRequest {
    pub room_id: Option<String>,
    pub called_by: Option<String>,
}

/// 诊室统计请求
#[derive(Debug, Deserialize, Serialize)]
pub struct RoomStatsRequest {
    pub rooms: Vec<RoomFilter>,
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus 指标
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.manager.metrics().render()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

/// 签到
pub async fn create_assignment(
    State(state): State<AppState>,
    Json(request): Json<CreateAssignmentRequest>,
) -> ApiResult<(StatusCode, Json<QueueAssignment>)> {
    info!("Check-in for encounter {} in room {:?}", request.encounter_id, request.room_id);
    let assignment = state.manager.create(request).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn get_assignment(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.get(id).await?))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.delete(id).await?))
}

pub async fn complete_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.complete(id).await?))
}

pub async fn expire_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.expire(id).await?))
}

pub async fn skip_assignment(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.skip(id).await?))
}

pub async fn cancel_assignment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<QueueAssignment>> {
    Ok(Json(state.manager.cancel(id).await?))
}

/// 预估等待时间
pub async fn wait_time(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<WaitTimeInfo>> {
    Ok(Json(state.manager.get_estimated_wait_time(id).await?))
}

/// 校验排队凭证
pub async fn validate_token(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let assignment = state.manager.validate_token(id).await?;
    Ok(Json(json!({
        "valid": true,
        "assignment": assignment
    })))
}

/// 等待列表（叫号顺序）
pub async fn list_waiting(
    State(state): State<AppState>,
    Query(query): Query<WaitingQuery>,
) -> ApiResult<Json<Value>> {
    let room_id = query.room_id.filter(|room| !room.is_empty());
    let waiting = state.manager.list_waiting(room_id.as_deref()).await?;

    Ok(Json(json!({
        "room_id": room_id,
        "total": waiting.len(),
        "waiting": waiting
    })))
}

/// 叫下一位，请求体可省略（全局叫号）
pub async fn call_next(
    State(state): State<AppState>,
    request: Option<Json<CallNextRequest>>,
) -> ApiResult<Json<QueueAssignment>> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let room_id = request.room_id.filter(|room| !room.is_empty());
    let called = state
        .manager
        .call_next(room_id.as_deref(), request.called_by.as_deref())
        .await?;
    Ok(Json(called))
}

/// 看板统计
pub async fn room_stats(
    State(state): State<AppState>,
    Json(request): Json<RoomStatsRequest>,
) -> ApiResult<Json<HashMap<String, RoomStats>>> {
    Ok(Json(state.stats.stats_for_rooms(&request.rooms).await?))
}

/// 手动触发过期清理
pub async fn run_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    Ok(Json(state.manager.run_auto_expire_sweep().await?))
}

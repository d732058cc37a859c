//! 健康检查 handlers

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::{app_state::AppState, error::AppError, infrastructure::db};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

/// 存活探针（不触达依赖）
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "进程存活")),
    tag = "health"
)]
pub async fn healthz() -> &'static str {
    "ok"
}

/// 就绪探针：校验数据库连通性
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "服务与依赖可用", body = HealthResponse),
        (status = 500, description = "数据库不可达")
    ),
    tag = "health"
)]
pub async fn api_health(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, AppError> {
    db::health_check(&state.pool)
        .await
        .map_err(|e| AppError::database_error(format!("Database health check failed: {}", e)))?;

    Ok(Json(HealthResponse {
        status: "ok".into(),
        database: "ok".into(),
    }))
}

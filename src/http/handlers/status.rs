//! Health, stats and moderation queue endpoints

use crate::core::service::ModerationService;
use crate::http::errors::HttpResult;
use crate::http::models::{ApiResponse, HealthResponse, QueueResponse, StatsResponse};
use axum::{extract::State, Json};
use std::sync::Arc;
use std::time::SystemTime;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ModerationService>,
    pub start_time: SystemTime,
}

impl AppState {
    pub fn new(service: Arc<ModerationService>) -> Self {
        Self {
            service,
            start_time: SystemTime::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.start_time)
            .unwrap_or_default()
            .as_secs()
    }
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        uptime_seconds: state.uptime_seconds(),
        scanners: state
            .service
            .context()
            .scanners
            .iter()
            .map(|s| s.as_str().to_string())
            .collect(),
    }))
}

/// GET /api/stats
pub async fn stats(State(state): State<AppState>) -> HttpResult<Json<ApiResponse<StatsResponse>>> {
    let visible_skills = state.service.visible_skill_count().await?;
    Ok(Json(ApiResponse::success(StatsResponse { visible_skills })))
}

/// GET /api/moderation/queue
pub async fn queue(State(state): State<AppState>) -> HttpResult<Json<ApiResponse<QueueResponse>>> {
    let health = state.service.engine().queue_health().await?;
    Ok(Json(ApiResponse::success(health.into())))
}

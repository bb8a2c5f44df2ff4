//! Skill moderation endpoints

use crate::core::model::VersionId;
use crate::http::auth::Actor;
use crate::http::errors::HttpResult;
use crate::http::handlers::AppState;
use crate::http::models::{
    ApiResponse, HardDeleteResponse, ModerationRequest, ReportRequest, ReportResponse,
    RescanResponse, SkillModerationResponse,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use validator::Validate;

/// POST /api/skills/:slug/moderation
pub async fn moderate_skill(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(slug): Path<String>,
    Json(request): Json<ModerationRequest>,
) -> HttpResult<Json<ApiResponse<SkillModerationResponse>>> {
    request.validate()?;
    let skill = state.service.context().get_skill_by_slug(&slug).await?;
    let notes = request
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let skill = state
        .service
        .engine()
        .moderate(actor, skill.id, request.action, notes)
        .await?;
    Ok(Json(ApiResponse::success(SkillModerationResponse::from(
        &skill,
    ))))
}

/// POST /api/skills/:slug/reports
pub async fn report_skill(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(slug): Path<String>,
    Json(request): Json<ReportRequest>,
) -> HttpResult<(StatusCode, Json<ApiResponse<ReportResponse>>)> {
    request.validate()?;
    let skill = state.service.context().get_skill_by_slug(&slug).await?;
    let outcome = state
        .service
        .engine()
        .report_skill(actor, skill.id, &request.reason)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ReportResponse {
            report_count: outcome.report_count,
            auto_hidden: outcome.auto_hidden,
        })),
    ))
}

/// DELETE /api/skills/:slug
pub async fn hard_delete_skill(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(slug): Path<String>,
) -> HttpResult<(StatusCode, Json<ApiResponse<HardDeleteResponse>>)> {
    let skill = state.service.context().get_skill_by_slug(&slug).await?;
    state.service.saga().hard_delete_skill(actor, skill.id).await?;
    info!("Hard delete of {} requested by {}", slug, actor);
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(HardDeleteResponse {
            skill_id: skill.id.to_string(),
            scheduled: true,
        })),
    ))
}

/// POST /api/versions/:id/rescan
pub async fn rescan_version(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(version_id): Path<VersionId>,
) -> HttpResult<(StatusCode, Json<ApiResponse<RescanResponse>>)> {
    let scanners = state.service.engine().rescan(actor, version_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(RescanResponse {
            version_id: version_id.to_string(),
            scanners: scanners.iter().map(|s| s.as_str().to_string()).collect(),
        })),
    ))
}

//! Ban and unban endpoints

use crate::core::model::UserId;
use crate::http::auth::Actor;
use crate::http::errors::HttpResult;
use crate::http::handlers::AppState;
use crate::http::models::{ApiResponse, BanRequest, BanResponse, UnbanResponse};
use axum::{
    extract::{Path, State},
    Json,
};
use validator::Validate;

/// POST /api/users/:id/ban
///
/// The body is optional; an empty body bans with the default reason.
pub async fn ban_user(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(user_id): Path<UserId>,
    request: Option<Json<BanRequest>>,
) -> HttpResult<Json<ApiResponse<BanResponse>>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    request.validate()?;
    let banned = state
        .service
        .bans()
        .ban_user(actor, user_id, request.reason)
        .await?;
    Ok(Json(ApiResponse::success(BanResponse {
        user_id: user_id.to_string(),
        banned,
    })))
}

/// POST /api/users/:id/unban
pub async fn unban_user(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(user_id): Path<UserId>,
) -> HttpResult<Json<ApiResponse<UnbanResponse>>> {
    let restored_skills = state.service.bans().unban_user(actor, user_id).await?;
    Ok(Json(ApiResponse::success(UnbanResponse {
        user_id: user_id.to_string(),
        restored_skills,
    })))
}

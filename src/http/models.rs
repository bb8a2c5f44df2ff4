//! Request and response models for the HTTP API

use crate::core::model::{ModerationFlag, Skill};
use crate::core::moderation::{ModeratorAction, QueueHealth};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Generic API response wrapper
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

/// Moderator action on a skill
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRequest {
    pub action: ModeratorAction,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// User report against a skill
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BanRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Moderation view of a skill
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SkillModerationResponse {
    pub id: String,
    pub slug: String,
    pub status: String,
    pub reason: Option<String>,
    pub flags: Vec<String>,
    pub report_count: u32,
    pub soft_deleted: bool,
    pub moderated_at: Option<String>,
}

impl From<&Skill> for SkillModerationResponse {
    fn from(skill: &Skill) -> Self {
        Self {
            id: skill.id.to_string(),
            slug: skill.slug.to_string(),
            status: skill
                .moderation_status
                .map(|s| s.as_str())
                .unwrap_or("active")
                .to_string(),
            reason: skill.moderation_reason.clone(),
            flags: skill
                .moderation_flags
                .iter()
                .map(ModerationFlag::as_str)
                .map(str::to_string)
                .collect(),
            report_count: skill.report_count,
            soft_deleted: skill.soft_deleted_at.is_some(),
            moderated_at: skill.moderated_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub report_count: u32,
    pub auto_hidden: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BanResponse {
    pub user_id: String,
    /// False when the user was already banned
    pub banned: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnbanResponse {
    pub user_id: String,
    pub restored_skills: usize,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RescanResponse {
    pub version_id: String,
    pub scanners: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HardDeleteResponse {
    pub skill_id: String,
    pub scheduled: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub visible_skills: u64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub pending: u64,
    pub stale: u64,
    pub oldest_pending_age_secs: Option<i64>,
}

impl From<QueueHealth> for QueueResponse {
    fn from(health: QueueHealth) -> Self {
        Self {
            pending: health.pending,
            stale: health.stale,
            oldest_pending_age_secs: health.oldest_pending_age_secs,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub scanners: Vec<String>,
}

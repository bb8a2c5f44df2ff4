//! User bans and the skill cascade
//!
//! Banning marks the user, revokes their API tokens and hides every skill
//! they own in scheduled batches. Each hidden skill remembers what the ban
//! overwrote so an unban can put it back.

use crate::core::arbiter::reasons;
use crate::core::model::{BanSnapshot, ModerationStatus, UserId};
use crate::core::scheduler::ScheduledTask;
use crate::core::service::{ServiceContext, ServiceError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of one cascade batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStep {
    pub hidden: usize,
    /// Cursor of the scheduled follow-up batch, if any
    pub next_cursor: Option<Uuid>,
}

pub struct BanService {
    ctx: Arc<ServiceContext>,
}

impl BanService {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Moderator-initiated ban. Returns false if the user was already banned.
    pub async fn ban_user(
        &self,
        actor: UserId,
        user_id: UserId,
        reason: Option<String>,
    ) -> Result<bool, ServiceError> {
        self.ctx.require_privileged(actor).await?;
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "banned by moderator".to_string());
        self.ban(Some(actor), user_id, reason).await
    }

    /// Ban triggered by a malware block on one of the user's skills.
    ///
    /// For an already banned user the token revocation and cascade run
    /// again, since an interrupted earlier ban may have stopped before them.
    pub async fn auto_ban(&self, user_id: UserId, trigger: &str) -> Result<bool, ServiceError> {
        let banned = self
            .ban(None, user_id, format!("malware detected in {}", trigger))
            .await?;
        if !banned {
            self.enforce(user_id).await?;
        }
        Ok(banned)
    }

    /// Revoke the user's tokens and schedule the skill cascade. Both steps
    /// are idempotent. Returns the number of tokens revoked.
    async fn enforce(&self, user_id: UserId) -> Result<usize, ServiceError> {
        let revoked = self.ctx.store.revoke_tokens(user_id, self.ctx.now()).await?;
        self.ctx
            .scheduler
            .schedule(
                ScheduledTask::BanCascade {
                    user_id,
                    cursor: None,
                },
                Duration::ZERO,
            )
            .await?;
        Ok(revoked)
    }

    async fn ban(
        &self,
        actor: Option<UserId>,
        user_id: UserId,
        reason: String,
    ) -> Result<bool, ServiceError> {
        let user = self
            .ctx
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))?;
        if user.is_privileged() {
            return Err(ServiceError::Forbidden(format!(
                "{} is a {} and cannot be banned",
                user.handle, user.role
            )));
        }
        if user.is_banned() {
            debug!("User {} already banned", user.handle);
            return Ok(false);
        }

        let now = self.ctx.now();
        let mut newly_banned = false;
        self.ctx
            .update_user(user_id, |u| {
                if u.is_banned() {
                    newly_banned = false;
                    return Ok(false);
                }
                u.banned_at = Some(now);
                u.ban_reason = Some(reason.clone());
                newly_banned = true;
                Ok(true)
            })
            .await?;
        if !newly_banned {
            return Ok(false);
        }

        let revoked = self.enforce(user_id).await?;
        self.ctx
            .audit(
                actor,
                "user.ban",
                "user",
                user_id.to_string(),
                serde_json::json!({
                    "reason": reason,
                    "revoked_tokens": revoked,
                    "automatic": actor.is_none(),
                }),
            )
            .await?;
        info!(
            "Banned {} ({}), revoked {} tokens",
            user.handle, reason, revoked
        );
        Ok(true)
    }

    /// Hide one page of a banned user's skills and schedule the next page
    pub async fn cascade_step(
        &self,
        user_id: UserId,
        cursor: Option<Uuid>,
    ) -> Result<CascadeStep, ServiceError> {
        let still_banned = self
            .ctx
            .store
            .get_user(user_id)
            .await?
            .map(|u| u.is_banned())
            .unwrap_or(false);
        if !still_banned {
            debug!("Ban cascade for {} stopped: user not banned", user_id);
            return Ok(CascadeStep {
                hidden: 0,
                next_cursor: None,
            });
        }

        let page = self
            .ctx
            .store
            .list_skills_by_owner(user_id, cursor, self.ctx.config.moderation.ban_batch_size)
            .await?;
        let now = self.ctx.now();
        let mut hidden = 0;
        for skill in &page.items {
            let update = self
                .ctx
                .update_skill(skill.id, |s| {
                    // Malware blocks keep their own reason
                    if s.soft_deleted_at.is_some() || s.is_blocked() {
                        return Ok(false);
                    }
                    s.ban_snapshot = Some(BanSnapshot {
                        status: s.moderation_status,
                        reason: s.moderation_reason.clone(),
                    });
                    if s.moderation_status != Some(ModerationStatus::Removed) {
                        s.moderation_status = Some(ModerationStatus::Hidden);
                    }
                    s.moderation_reason = Some(reasons::USER_BANNED.to_string());
                    s.soft_deleted_at = Some(now);
                    Ok(true)
                })
                .await?;
            if update.map(|u| u.changed()).unwrap_or(false) {
                hidden += 1;
            }
        }

        if let Some(next) = page.next_cursor {
            self.ctx
                .scheduler
                .schedule(
                    ScheduledTask::BanCascade {
                        user_id,
                        cursor: Some(next),
                    },
                    Duration::ZERO,
                )
                .await?;
        }
        debug!("Ban cascade for {} hid {} skills", user_id, hidden);
        Ok(CascadeStep {
            hidden,
            next_cursor: page.next_cursor,
        })
    }

    /// Lift a ban and restore the skills it hid. Returns the number restored.
    pub async fn unban_user(&self, actor: UserId, user_id: UserId) -> Result<usize, ServiceError> {
        self.ctx.require_privileged(actor).await?;
        let user = self
            .ctx
            .update_user(user_id, |u| {
                if !u.is_banned() {
                    return Ok(false);
                }
                u.banned_at = None;
                u.ban_reason = None;
                Ok(true)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {}", user_id)))?;

        let mut restored = 0;
        let mut cursor = None;
        loop {
            let page = self
                .ctx
                .store
                .list_skills_by_owner(user_id, cursor, self.ctx.config.moderation.ban_batch_size)
                .await?;
            for skill in &page.items {
                if skill.reason() != reasons::USER_BANNED || skill.ban_snapshot.is_none() {
                    continue;
                }
                let update = self
                    .ctx
                    .update_skill(skill.id, |s| {
                        let Some(snapshot) = s.ban_snapshot.take() else {
                            return Ok(false);
                        };
                        if s.reason() != reasons::USER_BANNED {
                            return Ok(false);
                        }
                        s.moderation_status = snapshot.status;
                        s.moderation_reason = snapshot.reason;
                        s.soft_deleted_at = None;
                        Ok(true)
                    })
                    .await?;
                if update.map(|u| u.changed()).unwrap_or(false) {
                    restored += 1;
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.ctx
            .audit(
                Some(actor),
                "user.unban",
                "user",
                user_id.to_string(),
                serde_json::json!({ "restored_skills": restored }),
            )
            .await?;
        info!("Unbanned {}, restored {} skills", user.handle, restored);
        Ok(restored)
    }
}

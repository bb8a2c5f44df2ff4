//! Hard-delete saga
//!
//! Removes a skill and everything that points at it in bounded batches.
//! Each step re-stamps the skill as soft-deleted and removed, processes one
//! batch of its phase, and schedules its own continuation. Phases with no
//! rows are skipped inline, so a phase holding N rows costs exactly
//! `ceil(N / batch_size)` steps. Every phase is safe to re-run.

use crate::core::arbiter::reasons;
use crate::core::model::{DependentKind, ModerationStatus, Skill, SkillId, SlugReservation, UserId};
use crate::core::scheduler::ScheduledTask;
use crate::core::service::{ServiceContext, ServiceError};
use crate::storage::{BatchResult, SkillReference, StoreError};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardDeletePhase {
    Versions,
    Fingerprints,
    Embeddings,
    Comments,
    Reports,
    Stars,
    Badges,
    DailyStats,
    StatEvents,
    Installs,
    RootInstalls,
    Leaderboards,
    CanonicalRefs,
    ForkRefs,
    Finalize,
}

impl HardDeletePhase {
    pub const ORDER: [HardDeletePhase; 15] = [
        HardDeletePhase::Versions,
        HardDeletePhase::Fingerprints,
        HardDeletePhase::Embeddings,
        HardDeletePhase::Comments,
        HardDeletePhase::Reports,
        HardDeletePhase::Stars,
        HardDeletePhase::Badges,
        HardDeletePhase::DailyStats,
        HardDeletePhase::StatEvents,
        HardDeletePhase::Installs,
        HardDeletePhase::RootInstalls,
        HardDeletePhase::Leaderboards,
        HardDeletePhase::CanonicalRefs,
        HardDeletePhase::ForkRefs,
        HardDeletePhase::Finalize,
    ];

    /// Following phase; `Finalize` is terminal
    pub fn next(self) -> HardDeletePhase {
        let index = Self::ORDER.iter().position(|p| *p == self).unwrap_or(0);
        Self::ORDER
            .get(index + 1)
            .copied()
            .unwrap_or(HardDeletePhase::Finalize)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HardDeletePhase::Versions => "versions",
            HardDeletePhase::Leaderboards => "leaderboards",
            HardDeletePhase::CanonicalRefs => "canonical_refs",
            HardDeletePhase::ForkRefs => "fork_refs",
            HardDeletePhase::Finalize => "finalize",
            other => other
                .dependent_kind()
                .map(|k| k.as_str())
                .unwrap_or("unknown"),
        }
    }

    fn dependent_kind(self) -> Option<DependentKind> {
        match self {
            HardDeletePhase::Fingerprints => Some(DependentKind::Fingerprints),
            HardDeletePhase::Embeddings => Some(DependentKind::Embeddings),
            HardDeletePhase::Comments => Some(DependentKind::Comments),
            HardDeletePhase::Reports => Some(DependentKind::Reports),
            HardDeletePhase::Stars => Some(DependentKind::Stars),
            HardDeletePhase::Badges => Some(DependentKind::Badges),
            HardDeletePhase::DailyStats => Some(DependentKind::DailyStats),
            HardDeletePhase::StatEvents => Some(DependentKind::StatEvents),
            HardDeletePhase::Installs => Some(DependentKind::Installs),
            HardDeletePhase::RootInstalls => Some(DependentKind::RootInstalls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A continuation for `phase` was scheduled
    Continued { phase: HardDeletePhase },
    /// Skill finalized and removed
    Completed,
    /// Skill already gone; nothing to do
    AlreadyDeleted,
}

pub struct HardDeleteSaga {
    ctx: Arc<ServiceContext>,
}

impl HardDeleteSaga {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Start a hard delete on behalf of a moderator
    pub async fn hard_delete_skill(&self, actor: UserId, skill_id: SkillId) -> Result<(), ServiceError> {
        let moderator = self.ctx.require_privileged(actor).await?;
        let skill = self.ctx.get_skill(skill_id).await?;
        self.stamp(skill_id).await?;
        self.ctx
            .scheduler
            .schedule(
                ScheduledTask::HardDelete {
                    skill_id,
                    phase: HardDeletePhase::Versions,
                    actor: Some(actor),
                },
                Duration::ZERO,
            )
            .await?;
        info!(
            "{} requested hard delete of skill {}",
            moderator.handle, skill.slug
        );
        Ok(())
    }

    /// Run one saga step
    pub async fn step(
        &self,
        skill_id: SkillId,
        phase: HardDeletePhase,
        actor: Option<UserId>,
    ) -> Result<StepOutcome, ServiceError> {
        let Some(skill) = self.ctx.store.get_skill(skill_id).await? else {
            debug!("Hard delete of {} already finished", skill_id);
            return Ok(StepOutcome::AlreadyDeleted);
        };
        self.stamp(skill_id).await?;

        let batch_size = self.ctx.config.hard_delete.batch_size;
        let mut phase = phase;
        loop {
            if phase == HardDeletePhase::Finalize {
                self.finalize(&skill, actor).await?;
                return Ok(StepOutcome::Completed);
            }

            let batch = self.run_batch(skill_id, phase, batch_size).await?;
            debug!(
                "Hard delete {} phase {}: {} rows, more: {}",
                skill.slug,
                phase.as_str(),
                batch.deleted,
                batch.has_more
            );
            if batch.has_more {
                self.continue_with(skill_id, phase, actor).await?;
                return Ok(StepOutcome::Continued { phase });
            }
            if batch.deleted == 0 {
                phase = phase.next();
                continue;
            }

            // Phase drained by this batch; skip ahead past empty phases
            let mut next = phase.next();
            while next != HardDeletePhase::Finalize && !self.has_rows(skill_id, next).await? {
                next = next.next();
            }
            if next == HardDeletePhase::Finalize {
                self.finalize(&skill, actor).await?;
                return Ok(StepOutcome::Completed);
            }
            self.continue_with(skill_id, next, actor).await?;
            return Ok(StepOutcome::Continued { phase: next });
        }
    }

    async fn continue_with(
        &self,
        skill_id: SkillId,
        phase: HardDeletePhase,
        actor: Option<UserId>,
    ) -> Result<(), ServiceError> {
        self.ctx
            .scheduler
            .schedule(
                ScheduledTask::HardDelete {
                    skill_id,
                    phase,
                    actor,
                },
                Duration::from_millis(self.ctx.config.hard_delete.continuation_delay_ms),
            )
            .await
    }

    /// Keep the skill invisible while the saga runs
    async fn stamp(&self, skill_id: SkillId) -> Result<(), ServiceError> {
        let now = self.ctx.now();
        self.ctx
            .update_skill(skill_id, |s| {
                if s.soft_deleted_at.is_some()
                    && s.moderation_status == Some(ModerationStatus::Removed)
                    && s.reason() == reasons::DELETED_HARD
                {
                    return Ok(false);
                }
                s.soft_deleted_at.get_or_insert(now);
                s.moderation_status = Some(ModerationStatus::Removed);
                s.moderation_reason = Some(reasons::DELETED_HARD.to_string());
                Ok(true)
            })
            .await?;
        Ok(())
    }

    async fn run_batch(
        &self,
        skill_id: SkillId,
        phase: HardDeletePhase,
        limit: usize,
    ) -> Result<BatchResult, ServiceError> {
        let store = &self.ctx.store;
        let result = match phase {
            HardDeletePhase::Versions => store.delete_versions_batch(skill_id, limit).await?,
            HardDeletePhase::Leaderboards => self.scrub_leaderboards(skill_id, limit).await?,
            HardDeletePhase::CanonicalRefs => {
                self.scrub_references(skill_id, SkillReference::Canonical, limit)
                    .await?
            }
            HardDeletePhase::ForkRefs => {
                self.scrub_references(skill_id, SkillReference::Fork, limit)
                    .await?
            }
            HardDeletePhase::Finalize => BatchResult::default(),
            other => match other.dependent_kind() {
                Some(kind) => store.delete_dependents_batch(kind, skill_id, limit).await?,
                None => BatchResult::default(),
            },
        };
        Ok(result)
    }

    async fn has_rows(&self, skill_id: SkillId, phase: HardDeletePhase) -> Result<bool, ServiceError> {
        let store = &self.ctx.store;
        let any = match phase {
            HardDeletePhase::Versions => !store.list_versions(skill_id).await?.is_empty(),
            HardDeletePhase::Leaderboards => !store
                .list_leaderboards_containing(skill_id, 1)
                .await?
                .is_empty(),
            HardDeletePhase::CanonicalRefs => !store
                .list_skills_referencing(skill_id, SkillReference::Canonical, 1)
                .await?
                .is_empty(),
            HardDeletePhase::ForkRefs => !store
                .list_skills_referencing(skill_id, SkillReference::Fork, 1)
                .await?
                .is_empty(),
            HardDeletePhase::Finalize => true,
            other => match other.dependent_kind() {
                Some(kind) => !store.list_dependents(kind, skill_id).await?.is_empty(),
                None => false,
            },
        };
        Ok(any)
    }

    async fn scrub_leaderboards(&self, skill_id: SkillId, limit: usize) -> Result<BatchResult, ServiceError> {
        let boards = self
            .ctx
            .store
            .list_leaderboards_containing(skill_id, limit + 1)
            .await?;
        let mut has_more = boards.len() > limit;
        let mut deleted = 0;
        for mut board in boards.into_iter().take(limit) {
            board.entries.retain(|e| e.skill_id != skill_id);
            board.updated_at = self.ctx.now();
            match self.ctx.store.update_leaderboard(board).await {
                Ok(_) => deleted += 1,
                Err(StoreError::Conflict(what)) => {
                    // Retried by the next step
                    warn!("Leaderboard {} changed during scrub", what);
                    has_more = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(BatchResult { deleted, has_more })
    }

    async fn scrub_references(
        &self,
        skill_id: SkillId,
        reference: SkillReference,
        limit: usize,
    ) -> Result<BatchResult, ServiceError> {
        let referencing = self
            .ctx
            .store
            .list_skills_referencing(skill_id, reference, limit + 1)
            .await?;
        let has_more = referencing.len() > limit;
        let mut deleted = 0;
        for other in referencing.into_iter().take(limit) {
            let update = self
                .ctx
                .update_skill(other.id, |s| match reference {
                    SkillReference::Canonical if s.canonical_skill_id == Some(skill_id) => {
                        s.canonical_skill_id = None;
                        Ok(true)
                    }
                    SkillReference::Fork
                        if s.fork_of.as_ref().map(|f| f.skill_id) == Some(skill_id) =>
                    {
                        s.fork_of = None;
                        Ok(true)
                    }
                    _ => Ok(false),
                })
                .await?;
            if update.map(|u| u.changed()).unwrap_or(false) {
                deleted += 1;
            }
        }
        Ok(BatchResult { deleted, has_more })
    }

    async fn finalize(&self, skill: &Skill, actor: Option<UserId>) -> Result<(), ServiceError> {
        let now = self.ctx.now();
        let days = i64::from(self.ctx.config.hard_delete.slug_reservation_days);
        self.ctx
            .store
            .put_slug_reservation(SlugReservation {
                slug: skill.slug.to_string(),
                original_owner_user_id: skill.owner_user_id,
                deleted_skill_id: skill.id,
                reason: reasons::DELETED_HARD.to_string(),
                created_at: now,
                expires_at: now + ChronoDuration::days(days),
            })
            .await?;

        if !self.ctx.store.delete_skill(skill.id).await? {
            debug!("Skill {} removed by a concurrent step", skill.id);
            return Ok(());
        }
        self.ctx
            .audit(
                actor,
                "skill.hard_delete",
                "skill",
                skill.id.to_string(),
                serde_json::json!({
                    "slug": skill.slug.as_str(),
                    "owner_user_id": skill.owner_user_id,
                }),
            )
            .await?;
        info!("Hard delete of skill {} finished", skill.slug);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert_eq!(HardDeletePhase::Versions.next(), HardDeletePhase::Fingerprints);
        assert_eq!(HardDeletePhase::RootInstalls.next(), HardDeletePhase::Leaderboards);
        assert_eq!(HardDeletePhase::ForkRefs.next(), HardDeletePhase::Finalize);
        assert_eq!(HardDeletePhase::Finalize.next(), HardDeletePhase::Finalize);
        assert_eq!(HardDeletePhase::DailyStats.as_str(), "daily_stats");
        assert_eq!(
            serde_json::to_string(&HardDeletePhase::CanonicalRefs).ok().as_deref(),
            Some("\"canonical_refs\"")
        );
    }
}

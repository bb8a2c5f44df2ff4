//! Moderation transitions
//!
//! Every change to a skill's moderation state goes through here: scanner
//! verdicts folded by the arbiter, stale/error bookkeeping for analyses,
//! moderator actions and user reports. Writes are compare-and-set through
//! [`ServiceContext::update_skill`], which also reports visibility deltas.

use crate::core::arbiter::{fold, is_automation_hold, reasons, FoldContext, ModerationState, Transition};
use crate::core::ban::BanService;
use crate::core::model::{
    AnalysisStatus, DependentKind, DependentRow, ModerationFlag, ModerationStatus, ScanAnalysis,
    ScanVerdict, ScannerId, Skill, SkillId, UserId, Verdict, VersionId,
};
use crate::core::scheduler::ScheduledTask;
use crate::core::service::{ServiceContext, ServiceError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest accepted report reason
pub const MAX_REPORT_REASON_LEN: usize = 500;

/// Explicit moderator decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorAction {
    /// Clear flags, activate, release any quality quarantine
    Approve,
    Hide,
    Remove,
    MarkMalware,
    SoftDelete,
    Restore,
}

impl ModeratorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeratorAction::Approve => "approve",
            ModeratorAction::Hide => "hide",
            ModeratorAction::Remove => "remove",
            ModeratorAction::MarkMalware => "mark_malware",
            ModeratorAction::SoftDelete => "soft_delete",
            ModeratorAction::Restore => "restore",
        }
    }

    fn apply(&self, skill: &mut Skill, now: chrono::DateTime<chrono::Utc>) {
        let keep_removed = |status: Option<ModerationStatus>| match status {
            Some(ModerationStatus::Removed) => Some(ModerationStatus::Removed),
            _ => Some(ModerationStatus::Hidden),
        };
        match self {
            ModeratorAction::Approve => {
                skill.moderation_flags.clear();
                skill.block_followup_pending = false;
                skill.moderation_status = Some(ModerationStatus::Active);
                skill.moderation_reason = Some(reasons::MANUAL_APPROVED.to_string());
                skill.quality_override_at = Some(now);
            }
            ModeratorAction::Hide => {
                skill.moderation_status = Some(ModerationStatus::Hidden);
                skill.moderation_reason = Some(reasons::MANUAL_HIDDEN.to_string());
            }
            ModeratorAction::Remove => {
                skill.moderation_status = Some(ModerationStatus::Removed);
                skill.moderation_reason = Some(reasons::MANUAL_REMOVED.to_string());
            }
            ModeratorAction::MarkMalware => {
                skill.moderation_flags = [ModerationFlag::BlockedMalware].into_iter().collect();
                skill.moderation_status = keep_removed(skill.moderation_status);
                skill.moderation_reason = Some(reasons::MANUAL_MALWARE.to_string());
            }
            ModeratorAction::SoftDelete => {
                skill.soft_deleted_at = Some(now);
                skill.moderation_status = keep_removed(skill.moderation_status);
                skill.moderation_reason = Some(reasons::MANUAL_SOFT_DELETED.to_string());
            }
            ModeratorAction::Restore => {
                skill.soft_deleted_at = None;
                skill.ban_snapshot = None;
                if skill.is_blocked() {
                    // Only an explicit approval lifts a malware block
                    skill.moderation_status = keep_removed(skill.moderation_status);
                } else {
                    skill.moderation_status = Some(ModerationStatus::Active);
                    skill.moderation_reason = Some(reasons::MANUAL_RESTORED.to_string());
                }
            }
        }
    }
}

impl std::str::FromStr for ModeratorAction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ModeratorAction::Approve),
            "hide" => Ok(ModeratorAction::Hide),
            "remove" => Ok(ModeratorAction::Remove),
            "mark_malware" => Ok(ModeratorAction::MarkMalware),
            "soft_delete" => Ok(ModeratorAction::SoftDelete),
            "restore" => Ok(ModeratorAction::Restore),
            other => Err(ServiceError::Validation(format!(
                "Unknown moderation action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    pub report_count: u32,
    pub auto_hidden: bool,
}

/// Backlog of skills still waiting on scanners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    /// Skills whose latest version has no verdict yet
    pub pending: u64,
    /// Skills whose scanners gave up without a verdict
    pub stale: u64,
    /// Age of the oldest pending version in seconds
    pub oldest_pending_age_secs: Option<i64>,
}

pub struct ModerationEngine {
    ctx: Arc<ServiceContext>,
    bans: Arc<BanService>,
}

impl ModerationEngine {
    pub fn new(ctx: Arc<ServiceContext>, bans: Arc<BanService>) -> Self {
        Self { ctx, bans }
    }

    /// Fold one scanner verdict into the owning skill.
    ///
    /// Returns `None` when the version or skill is gone or soft-deleted, or
    /// the verdict concerns an older version and is not malicious.
    pub async fn apply_scan_verdict(
        &self,
        version_id: VersionId,
        verdict: ScanVerdict,
    ) -> Result<Option<Transition>, ServiceError> {
        let Some(version) = self.ctx.store.get_version(version_id).await? else {
            debug!("Verdict for unknown version {} dropped", version_id);
            return Ok(None);
        };
        if version.soft_deleted_at.is_some() {
            return Ok(None);
        }
        let Some(skill) = self.ctx.store.get_skill(version.skill_id).await? else {
            return Ok(None);
        };
        if skill.soft_deleted_at.is_some() {
            debug!("Skill {} soft-deleted, verdict dropped", skill.id);
            return Ok(None);
        }
        if skill.latest_version_id != Some(version_id) && verdict.verdict != Verdict::Malicious {
            debug!(
                "{} verdict for superseded version {} ignored",
                verdict.verdict.as_str(),
                version_id
            );
            return Ok(None);
        }

        let privileged_owner = self
            .ctx
            .store
            .get_user(skill.owner_user_id)
            .await?
            .map(|u| u.is_privileged())
            .unwrap_or(false);
        let other_verdicts: Vec<(ScannerId, Verdict)> = ScannerId::ALL
            .into_iter()
            .filter(|s| *s != verdict.scanner)
            .filter_map(|s| version.cached_verdict(s).map(|v| (s, v)))
            .collect();
        let mode = self.ctx.config.scanners.mode(verdict.scanner);

        let update = self
            .ctx
            .update_skill(skill.id, |s| {
                if s.soft_deleted_at.is_some() {
                    return Ok(false);
                }
                let before = ModerationState::from_skill(s);
                let fold_ctx = FoldContext {
                    privileged_owner,
                    quality_locked: s.is_quality_locked(),
                    other_verdicts: other_verdicts.clone(),
                    mode,
                };
                let after = fold(&before, &verdict, &fold_ctx);
                let step = Transition { before, after };
                if !step.changed() {
                    return Ok(false);
                }
                step.after.apply_to(s);
                if step.became_blocked() {
                    s.block_followup_pending = true;
                }
                Ok(true)
            })
            .await?;
        let Some(update) = update else {
            return Ok(None);
        };

        let transition = Transition {
            before: ModerationState::from_skill(&update.before),
            after: ModerationState::from_skill(&update.after),
        };
        if transition.changed() {
            info!(
                "Skill {} moderation {:?}/{:?} -> {:?}/{:?} after {} {}",
                update.after.slug,
                transition.before.status,
                transition.before.reason,
                transition.after.status,
                transition.after.reason,
                verdict.scanner.as_str(),
                verdict.verdict.as_str()
            );
        }

        // Also finishes a follow-up that an earlier, interrupted run committed
        if update.after.block_followup_pending {
            self.finish_block(
                &update.after,
                privileged_owner,
                serde_json::json!({
                    "scanner": verdict.scanner.as_str(),
                    "version_id": version_id,
                    "evidence": verdict.evidence,
                }),
            )
            .await?;
        }
        Ok(Some(transition))
    }

    /// Ban the owner of a newly blocked skill and audit the block, then
    /// clear the skill's follow-up marker. Repeating it is harmless.
    async fn finish_block(
        &self,
        skill: &Skill,
        privileged_owner: bool,
        metadata: serde_json::Value,
    ) -> Result<(), ServiceError> {
        if !privileged_owner {
            self.bans
                .auto_ban(skill.owner_user_id, &skill.slug.to_string())
                .await?;
        }
        self.ctx
            .audit(
                None,
                "skill.blocked",
                "skill",
                skill.id.to_string(),
                metadata,
            )
            .await?;
        self.ctx
            .update_skill(skill.id, |s| {
                if !s.block_followup_pending {
                    return Ok(false);
                }
                s.block_followup_pending = false;
                Ok(true)
            })
            .await?;
        Ok(())
    }

    /// Store a completed analysis, then fold its verdict
    pub async fn record_verdict(
        &self,
        version_id: VersionId,
        verdict: ScanVerdict,
        analysis: ScanAnalysis,
    ) -> Result<Option<Transition>, ServiceError> {
        let scanner = verdict.scanner;
        let saved = self
            .ctx
            .update_version(version_id, |v| {
                v.set_analysis(scanner, analysis.clone());
                Ok(true)
            })
            .await?;
        if saved.is_none() {
            return Ok(None);
        }
        self.apply_scan_verdict(version_id, verdict).await
    }

    /// Note another outstanding poll unless a verdict already landed
    pub async fn mark_pending(
        &self,
        version_id: VersionId,
        scanner: ScannerId,
        attempts: u32,
    ) -> Result<(), ServiceError> {
        let now = self.ctx.now();
        self.ctx
            .update_version(version_id, |v| {
                if let Some(current) = v.analysis(scanner) {
                    if current.status != AnalysisStatus::Pending {
                        return Ok(false);
                    }
                }
                v.set_analysis(scanner, ScanAnalysis::pending(attempts, now));
                Ok(true)
            })
            .await?;
        Ok(())
    }

    /// Give up on a scanner for this version
    pub async fn mark_stale(
        &self,
        version_id: VersionId,
        scanner: ScannerId,
        attempts: u32,
    ) -> Result<(), ServiceError> {
        let now = self.ctx.now();
        let saved = self
            .ctx
            .update_version(version_id, |v| {
                if v.cached_verdict(scanner).is_some() {
                    return Ok(false);
                }
                v.set_analysis(scanner, ScanAnalysis::stale(attempts, now));
                Ok(true)
            })
            .await?;
        if saved.is_some() {
            warn!(
                "{} analysis for version {} stale after {} attempts",
                scanner.as_str(),
                version_id,
                attempts
            );
            self.settle_unscanned(version_id).await?;
        }
        Ok(())
    }

    /// Record unusable scanner output; the analysis is not retried
    pub async fn record_error(
        &self,
        version_id: VersionId,
        scanner: ScannerId,
        message: String,
    ) -> Result<(), ServiceError> {
        let now = self.ctx.now();
        let saved = self
            .ctx
            .update_version(version_id, |v| {
                if v.cached_verdict(scanner).is_some() {
                    return Ok(false);
                }
                v.set_analysis(scanner, ScanAnalysis::error(message.clone(), now));
                Ok(true)
            })
            .await?;
        if saved.is_some() {
            self.settle_unscanned(version_id).await?;
        }
        Ok(())
    }

    /// Release a skill still waiting on scans once a scanner gave up and no
    /// verdict landed from any scanner.
    async fn settle_unscanned(&self, version_id: VersionId) -> Result<(), ServiceError> {
        let Some(version) = self.ctx.store.get_version(version_id).await? else {
            return Ok(());
        };
        if ScannerId::ALL
            .iter()
            .any(|s| version.cached_verdict(*s).is_some())
        {
            return Ok(());
        }

        let activate = self.ctx.config.scanners.activate_on_stale;
        let update = self
            .ctx
            .update_skill(version.skill_id, |s| {
                if s.latest_version_id != Some(version_id)
                    || s.soft_deleted_at.is_some()
                    || s.is_blocked()
                    || s.is_quality_locked()
                    || s.reason() != reasons::PENDING_SCAN
                {
                    return Ok(false);
                }
                s.moderation_reason = Some(reasons::PENDING_SCAN_STALE.to_string());
                s.moderation_status = Some(if activate {
                    ModerationStatus::Active
                } else {
                    ModerationStatus::Hidden
                });
                Ok(true)
            })
            .await?;
        if let Some(update) = update.filter(|u| u.changed()) {
            info!(
                "Skill {} released without scanner verdict (status {:?})",
                update.after.slug, update.after.moderation_status
            );
        }
        Ok(())
    }

    /// Apply a file-reputation verdict delivered out of band to every
    /// version sharing the bundle hash. Returns the number of versions updated.
    pub async fn apply_file_reputation_by_hash(
        &self,
        bundle_hash: &str,
        verdict: Verdict,
        evidence: Option<String>,
    ) -> Result<usize, ServiceError> {
        let versions = self.ctx.store.list_versions_by_bundle_hash(bundle_hash).await?;
        let now = self.ctx.now();
        let mut applied = 0;
        for version in versions {
            if version.soft_deleted_at.is_some() {
                continue;
            }
            let scan = ScanVerdict {
                scanner: ScannerId::FileReputation,
                verdict,
                evidence: evidence.clone(),
                observed_at: now,
            };
            let analysis = ScanAnalysis::completed(verdict, evidence.clone(), now);
            self.record_verdict(version.id, scan, analysis).await?;
            applied += 1;
        }
        info!(
            "Applied {} file reputation verdict for {} to {} versions",
            verdict.as_str(),
            bundle_hash,
            applied
        );
        Ok(applied)
    }

    /// Reset cached analyses and dispatch every configured scanner again
    pub async fn rescan(
        &self,
        actor: UserId,
        version_id: VersionId,
    ) -> Result<Vec<ScannerId>, ServiceError> {
        self.ctx.require_privileged(actor).await?;
        let now = self.ctx.now();
        let scanners = self.ctx.scanners.clone();
        let version = self
            .ctx
            .update_version(version_id, |v| {
                v.file_reputation = None;
                v.llm_judge = None;
                for scanner in &scanners {
                    v.set_analysis(*scanner, ScanAnalysis::pending(0, now));
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Version {}", version_id)))?;

        for scanner in &scanners {
            self.ctx
                .scheduler
                .schedule(scan_task(*scanner, version_id, 0), Duration::ZERO)
                .await?;
        }
        self.ctx
            .audit(
                Some(actor),
                "version.rescan",
                "version",
                version_id.to_string(),
                serde_json::json!({
                    "skill_id": version.skill_id,
                    "scanners": scanners.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                }),
            )
            .await?;
        Ok(scanners)
    }

    /// Apply a moderator decision to a skill
    pub async fn moderate(
        &self,
        actor: UserId,
        skill_id: SkillId,
        action: ModeratorAction,
        notes: Option<String>,
    ) -> Result<Skill, ServiceError> {
        let moderator = self.ctx.require_privileged(actor).await?;
        let skill = self
            .ctx
            .store
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill {}", skill_id)))?;
        let owner = self.ctx.store.get_user(skill.owner_user_id).await?;
        let owner_privileged = owner.as_ref().map(|u| u.is_privileged()).unwrap_or(false);
        if action == ModeratorAction::Restore {
            if let Some(owner) = owner.as_ref().filter(|u| u.is_banned()) {
                return Err(ServiceError::Conflict(format!(
                    "Owner {} is banned; unban the user to restore {}",
                    owner.handle, skill.slug
                )));
            }
        }

        let now = self.ctx.now();
        let update = self
            .ctx
            .update_skill(skill_id, |s| {
                let was_blocked = s.is_blocked();
                action.apply(s, now);
                if !was_blocked && s.is_blocked() {
                    s.block_followup_pending = true;
                }
                s.moderated_at = Some(now);
                s.moderated_by = Some(actor);
                s.last_reviewed_at = Some(now);
                if notes.is_some() {
                    s.moderation_notes = notes.clone();
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill {}", skill_id)))?;

        info!(
            "{} applied {} to skill {}",
            moderator.handle,
            action.as_str(),
            update.after.slug
        );
        self.ctx
            .audit(
                Some(actor),
                &format!("skill.{}", action.as_str()),
                "skill",
                skill_id.to_string(),
                serde_json::json!({
                    "before": {
                        "status": update.before.moderation_status,
                        "reason": update.before.moderation_reason,
                        "flags": update.before.moderation_flags,
                    },
                    "after": {
                        "status": update.after.moderation_status,
                        "reason": update.after.moderation_reason,
                        "flags": update.after.moderation_flags,
                    },
                    "notes": notes,
                }),
            )
            .await?;

        if update.after.block_followup_pending {
            self.finish_block(
                &update.after,
                owner_privileged,
                serde_json::json!({
                    "moderator": actor,
                    "reason": update.after.moderation_reason,
                }),
            )
            .await?;
        }
        Ok(update.after)
    }

    /// File a user report; enough distinct reports hide the skill
    pub async fn report_skill(
        &self,
        reporter: UserId,
        skill_id: SkillId,
        reason: &str,
    ) -> Result<ReportOutcome, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::Validation("Report reason is required".to_string()));
        }
        if reason.chars().count() > MAX_REPORT_REASON_LEN {
            return Err(ServiceError::Validation(format!(
                "Report reason too long (max {} characters)",
                MAX_REPORT_REASON_LEN
            )));
        }

        let user = self
            .ctx
            .store
            .get_user(reporter)
            .await?
            .ok_or_else(|| ServiceError::Forbidden(format!("Unknown reporter {}", reporter)))?;
        if user.is_banned() || user.deleted_at.is_some() {
            return Err(ServiceError::Forbidden(format!(
                "User {} cannot file reports",
                user.handle
            )));
        }
        let skill = self.ctx.get_skill(skill_id).await?;
        if skill.soft_deleted_at.is_some() {
            return Err(ServiceError::NotFound(format!("Skill {}", skill_id)));
        }

        let existing = self
            .ctx
            .store
            .list_dependents(DependentKind::Reports, skill_id)
            .await?;
        if existing.iter().any(|r| r.user_id == Some(reporter)) {
            return Err(ServiceError::Conflict(format!(
                "{} already reported {}",
                user.handle, skill.slug
            )));
        }

        let now = self.ctx.now();
        self.ctx
            .store
            .insert_dependent(
                DependentRow::new(DependentKind::Reports, skill_id, now)
                    .with_user(reporter)
                    .with_key(reason),
            )
            .await?;

        let threshold = self.ctx.config.moderation.auto_hide_report_threshold;
        let update = self
            .ctx
            .update_skill(skill_id, |s| {
                s.report_count += 1;
                let visible = matches!(s.moderation_status, None | Some(ModerationStatus::Active));
                if s.report_count >= threshold
                    && visible
                    && s.reason() != reasons::MANUAL_APPROVED
                {
                    s.moderation_status = Some(ModerationStatus::Hidden);
                    s.moderation_reason = Some(reasons::REPORTS_AUTO_HIDDEN.to_string());
                }
                Ok(true)
            })
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill {}", skill_id)))?;

        let auto_hidden = update.before.reason() != reasons::REPORTS_AUTO_HIDDEN
            && update.after.reason() == reasons::REPORTS_AUTO_HIDDEN;
        if auto_hidden {
            info!(
                "Skill {} auto-hidden after {} reports",
                update.after.slug, update.after.report_count
            );
        }
        self.ctx
            .audit(
                Some(reporter),
                "skill.report",
                "skill",
                skill_id.to_string(),
                serde_json::json!({ "reason": reason, "auto_hidden": auto_hidden }),
            )
            .await?;

        Ok(ReportOutcome {
            report_count: update.after.report_count,
            auto_hidden,
        })
    }

    /// Count skills waiting on scanners and the oldest wait
    pub async fn queue_health(&self) -> Result<QueueHealth, ServiceError> {
        let now = self.ctx.now();
        let page_size = self.ctx.config.recount_page_size;

        let mut pending = 0u64;
        let mut oldest: Option<chrono::DateTime<chrono::Utc>> = None;
        let mut cursor = None;
        loop {
            let page = self
                .ctx
                .store
                .list_skills_by_reason(reasons::PENDING_SCAN, cursor, page_size)
                .await?;
            for skill in page.items.iter().filter(|s| s.soft_deleted_at.is_none()) {
                pending += 1;
                let since = match skill.latest_version_id {
                    Some(id) => self
                        .ctx
                        .store
                        .get_version(id)
                        .await?
                        .map(|v| v.created_at)
                        .unwrap_or(skill.updated_at),
                    None => skill.updated_at,
                };
                oldest = Some(oldest.map_or(since, |o| o.min(since)));
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut stale = 0u64;
        let mut cursor = None;
        loop {
            let page = self
                .ctx
                .store
                .list_skills_by_reason(reasons::PENDING_SCAN_STALE, cursor, page_size)
                .await?;
            stale += page.items.iter().filter(|s| s.soft_deleted_at.is_none()).count() as u64;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(QueueHealth {
            pending,
            stale,
            oldest_pending_age_secs: oldest.map(|o| (now - o).num_seconds().max(0)),
        })
    }
}

/// Task that runs `scanner` against a version
pub fn scan_task(scanner: ScannerId, version_id: VersionId, attempt: u32) -> ScheduledTask {
    match scanner {
        ScannerId::FileReputation => ScheduledTask::ScanFileReputation {
            version_id,
            attempt,
        },
        ScannerId::LlmJudge => ScheduledTask::ScanLlmJudge {
            version_id,
            attempt,
        },
    }
}

/// Whether a new version may reset the skill back to `pending.scan`
pub fn can_reset_to_pending(skill: &Skill) -> bool {
    !skill.is_blocked()
        && !skill.is_quality_locked()
        && skill.soft_deleted_at.is_none()
        && is_automation_hold(skill.moderation_reason.as_deref())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip_through_str() {
        for action in [
            ModeratorAction::Approve,
            ModeratorAction::Hide,
            ModeratorAction::Remove,
            ModeratorAction::MarkMalware,
            ModeratorAction::SoftDelete,
            ModeratorAction::Restore,
        ] {
            assert_eq!(action.as_str().parse::<ModeratorAction>().ok(), Some(action));
        }
        assert!("ban".parse::<ModeratorAction>().is_err());
    }

    #[test]
    fn test_mark_malware_keeps_removed_status() {
        let now = chrono::Utc::now();
        let mut skill = Skill::new(
            crate::core::model::Slug::new("demo").unwrap(),
            "Demo",
            uuid::Uuid::new_v4(),
            now,
        );
        skill.moderation_status = Some(ModerationStatus::Removed);
        ModeratorAction::MarkMalware.apply(&mut skill, now);
        assert_eq!(skill.moderation_status, Some(ModerationStatus::Removed));
        assert!(skill.is_blocked());

        ModeratorAction::Approve.apply(&mut skill, now);
        assert!(!skill.is_blocked());
        assert_eq!(skill.moderation_status, Some(ModerationStatus::Active));
        assert_eq!(skill.quality_override_at, Some(now));
    }

    #[test]
    fn test_restore_keeps_malware_block_hidden() {
        let now = chrono::Utc::now();
        let mut skill = Skill::new(
            crate::core::model::Slug::new("demo").unwrap(),
            "Demo",
            uuid::Uuid::new_v4(),
            now,
        );
        ModeratorAction::MarkMalware.apply(&mut skill, now);
        ModeratorAction::SoftDelete.apply(&mut skill, now);
        ModeratorAction::Restore.apply(&mut skill, now);

        assert!(skill.soft_deleted_at.is_none());
        assert!(skill.is_blocked());
        assert_eq!(skill.moderation_status, Some(ModerationStatus::Hidden));
    }
}

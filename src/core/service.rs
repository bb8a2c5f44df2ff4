//! Moderation service: error type, shared context and the top-level facade

use crate::core::ban::BanService;
use crate::core::blob_storage::BlobStorage;
use crate::core::clock::Clock;
use crate::core::config::ModerationConfig;
use crate::core::hard_delete::HardDeleteSaga;
use crate::core::model::{
    AuditLog, ScannerId, Skill, SkillId, SkillVersion, User, UserId, VersionId,
};
use crate::core::moderation::ModerationEngine;
use crate::core::publish::PublishPipeline;
use crate::core::scheduler::{ScheduledTask, TaskScheduler};
use crate::core::visibility::{visibility_delta, CounterBackend, GlobalVisibilityCounter};
use crate::scanners::{FileReputationApi, FileReputationScanner, LlmJudgeApi, LlmJudgeScanner};
use crate::storage::{RateLimitStore, RegistryStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// User-correctable input problem
    #[error("Validation error: {0}")]
    Validation(String),

    /// Rejected by policy (quality gate, account age, reserved slug)
    #[error("Policy violation: {message}")]
    Policy {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Scanner or other external dependency failed
    #[error("External service error: {0}")]
    External(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            StoreError::Conflict(what) => ServiceError::Conflict(what),
            StoreError::NotReady(_) | StoreError::Backend(_) => ServiceError::Storage(e.to_string()),
        }
    }
}

/// Committed skill write: the record before and after
#[derive(Debug, Clone)]
pub struct SkillUpdate {
    pub before: Skill,
    pub after: Skill,
}

impl SkillUpdate {
    pub fn changed(&self) -> bool {
        self.before.revision != self.after.revision
    }
}

/// Ports and configuration shared by every moderation component
pub struct ServiceContext {
    pub store: Arc<dyn RegistryStore>,
    pub rate_store: Arc<dyn RateLimitStore>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub blobs: Arc<dyn BlobStorage>,
    pub clock: Arc<dyn Clock>,
    pub counter: GlobalVisibilityCounter,
    pub config: ModerationConfig,
    /// Scanners wired into this deployment
    pub scanners: Vec<ScannerId>,
}

impl ServiceContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read-modify-write a skill with compare-and-set retries.
    ///
    /// `mutate` returns `false` to skip the write. Returns `None` when the
    /// skill does not exist. Visibility changes are reported to the counter.
    pub async fn update_skill<F>(
        &self,
        skill_id: SkillId,
        mut mutate: F,
    ) -> Result<Option<SkillUpdate>, ServiceError>
    where
        F: FnMut(&mut Skill) -> Result<bool, ServiceError>,
    {
        let attempts = self.config.moderation.write_attempts.max(1);
        for attempt in 1..=attempts {
            let Some(current) = self.store.get_skill(skill_id).await? else {
                return Ok(None);
            };
            let mut next = current.clone();
            if !mutate(&mut next)? {
                return Ok(Some(SkillUpdate {
                    before: current.clone(),
                    after: current,
                }));
            }
            next.updated_at = self.now();
            match self.store.update_skill(next).await {
                Ok(saved) => {
                    self.counter
                        .adjust(visibility_delta(Some(&current), Some(&saved)))
                        .await;
                    return Ok(Some(SkillUpdate {
                        before: current,
                        after: saved,
                    }));
                }
                Err(StoreError::Conflict(_)) => {
                    debug!("Skill {} write conflict (attempt {})", skill_id, attempt);
                }
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Conflict(format!(
            "skill {} kept changing during update",
            skill_id
        )))
    }

    /// Read-modify-write a version with compare-and-set retries
    pub async fn update_version<F>(
        &self,
        version_id: VersionId,
        mut mutate: F,
    ) -> Result<Option<SkillVersion>, ServiceError>
    where
        F: FnMut(&mut SkillVersion) -> Result<bool, ServiceError>,
    {
        let attempts = self.config.moderation.write_attempts.max(1);
        for _ in 0..attempts {
            let Some(current) = self.store.get_version(version_id).await? else {
                return Ok(None);
            };
            let mut next = current.clone();
            if !mutate(&mut next)? {
                return Ok(Some(current));
            }
            match self.store.update_version(next).await {
                Ok(saved) => return Ok(Some(saved)),
                Err(StoreError::Conflict(_)) => continue,
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Conflict(format!(
            "version {} kept changing during update",
            version_id
        )))
    }

    pub async fn update_user<F>(
        &self,
        user_id: UserId,
        mut mutate: F,
    ) -> Result<Option<User>, ServiceError>
    where
        F: FnMut(&mut User) -> Result<bool, ServiceError>,
    {
        let attempts = self.config.moderation.write_attempts.max(1);
        for _ in 0..attempts {
            let Some(current) = self.store.get_user(user_id).await? else {
                return Ok(None);
            };
            let mut next = current.clone();
            if !mutate(&mut next)? {
                return Ok(Some(current));
            }
            match self.store.update_user(next).await {
                Ok(saved) => return Ok(Some(saved)),
                Err(StoreError::Conflict(_)) => continue,
                Err(StoreError::NotFound(_)) => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ServiceError::Conflict(format!(
            "user {} kept changing during update",
            user_id
        )))
    }

    pub async fn audit(
        &self,
        actor: Option<UserId>,
        action: &str,
        target_type: &str,
        target_id: String,
        metadata: serde_json::Value,
    ) -> Result<(), ServiceError> {
        self.store
            .insert_audit_log(AuditLog::new(
                actor,
                action,
                target_type,
                target_id,
                metadata,
                self.now(),
            ))
            .await?;
        Ok(())
    }

    /// Load the acting user and require a moderator or admin
    pub async fn require_privileged(&self, actor: UserId) -> Result<User, ServiceError> {
        let user = self
            .store
            .get_user(actor)
            .await?
            .ok_or_else(|| ServiceError::Forbidden(format!("Unknown actor {}", actor)))?;
        if !user.is_privileged() || user.is_banned() || user.deleted_at.is_some() {
            return Err(ServiceError::Forbidden(format!(
                "User {} is not a moderator",
                user.handle
            )));
        }
        Ok(user)
    }

    pub async fn get_skill(&self, skill_id: SkillId) -> Result<Skill, ServiceError> {
        self.store
            .get_skill(skill_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill {}", skill_id)))
    }

    pub async fn get_skill_by_slug(&self, slug: &str) -> Result<Skill, ServiceError> {
        self.store
            .get_skill_by_slug(slug)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Skill '{}'", slug)))
    }
}

/// External collaborators handed to [`ModerationService::new`]
pub struct ServicePorts {
    pub store: Arc<dyn RegistryStore>,
    pub rate_store: Arc<dyn RateLimitStore>,
    pub counter: CounterBackend,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub blobs: Arc<dyn BlobStorage>,
    pub clock: Arc<dyn Clock>,
    pub file_reputation: Option<Arc<dyn FileReputationApi>>,
    pub llm_judge: Option<Arc<dyn LlmJudgeApi>>,
}

/// Top-level moderation service
///
/// Owns every component and dispatches scheduled tasks to them.
pub struct ModerationService {
    ctx: Arc<ServiceContext>,
    engine: Arc<ModerationEngine>,
    bans: Arc<BanService>,
    saga: HardDeleteSaga,
    publisher: PublishPipeline,
    file_reputation: Option<FileReputationScanner>,
    llm_judge: Option<LlmJudgeScanner>,
}

impl ModerationService {
    pub fn new(ports: ServicePorts, config: ModerationConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        info!("Initializing moderation service v{}", crate::VERSION);

        let mut scanners = Vec::new();
        if ports.file_reputation.is_some() {
            scanners.push(ScannerId::FileReputation);
        }
        if ports.llm_judge.is_some() {
            scanners.push(ScannerId::LlmJudge);
        }
        if scanners.is_empty() {
            warn!("No scanners configured; new versions stay pending until reviewed");
        }

        let counter = GlobalVisibilityCounter::new(
            ports.counter,
            ports.store.clone(),
            ports.clock.clone(),
            config.recount_page_size,
        );
        let ctx = Arc::new(ServiceContext {
            store: ports.store,
            rate_store: ports.rate_store,
            scheduler: ports.scheduler,
            blobs: ports.blobs,
            clock: ports.clock,
            counter,
            config,
            scanners,
        });

        let bans = Arc::new(BanService::new(ctx.clone()));
        let engine = Arc::new(ModerationEngine::new(ctx.clone(), bans.clone()));
        let saga = HardDeleteSaga::new(ctx.clone());
        let publisher = PublishPipeline::new(ctx.clone());
        let file_reputation = ports
            .file_reputation
            .map(|api| FileReputationScanner::new(ctx.clone(), engine.clone(), api));
        let llm_judge = ports
            .llm_judge
            .map(|api| LlmJudgeScanner::new(ctx.clone(), engine.clone(), api));

        Ok(Self {
            ctx,
            engine,
            bans,
            saga,
            publisher,
            file_reputation,
            llm_judge,
        })
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.ctx.config
    }

    pub fn engine(&self) -> &ModerationEngine {
        &self.engine
    }

    pub fn bans(&self) -> &BanService {
        &self.bans
    }

    pub fn saga(&self) -> &HardDeleteSaga {
        &self.saga
    }

    pub fn publisher(&self) -> &PublishPipeline {
        &self.publisher
    }

    pub fn file_reputation(&self) -> Option<&FileReputationScanner> {
        self.file_reputation.as_ref()
    }

    pub fn llm_judge(&self) -> Option<&LlmJudgeScanner> {
        self.llm_judge.as_ref()
    }

    /// Number of publicly visible skills
    pub async fn visible_skill_count(&self) -> Result<u64, ServiceError> {
        self.ctx.counter.read().await
    }

    /// Execute one scheduled task
    pub async fn run_task(&self, task: ScheduledTask) -> Result<(), ServiceError> {
        debug!("Running task {:?}", task);
        match task {
            ScheduledTask::ScanFileReputation {
                version_id,
                attempt,
            } => match &self.file_reputation {
                Some(scanner) => scanner.scan(version_id, attempt).await.map(|_| ()),
                None => {
                    warn!("File reputation scan for {} dropped: scanner not configured", version_id);
                    Ok(())
                }
            },
            ScheduledTask::ScanLlmJudge {
                version_id,
                attempt,
            } => match &self.llm_judge {
                Some(scanner) => scanner.scan(version_id, attempt).await.map(|_| ()),
                None => {
                    warn!("LLM judge scan for {} dropped: scanner not configured", version_id);
                    Ok(())
                }
            },
            ScheduledTask::HardDelete {
                skill_id,
                phase,
                actor,
            } => self.saga.step(skill_id, phase, actor).await.map(|_| ()),
            ScheduledTask::BanCascade { user_id, cursor } => {
                self.bans.cascade_step(user_id, cursor).await.map(|_| ())
            }
        }
    }
}

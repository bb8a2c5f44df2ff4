//! Storage ports for the moderation core
//!
//! Every mutable record carries a `revision`; updates are compare-and-set and
//! fail with [`StoreError::Conflict`] when another writer committed first.
//! That is the per-skill serialization primitive the moderation transitions
//! rely on.

pub mod memory;

pub use memory::MemoryRegistryStore;

use crate::core::model::{
    ApiToken, AuditLog, DependentKind, DependentRow, GlobalStats, Leaderboard, RateWindow, Skill,
    SkillId, SkillVersion, SlugReservation, User, UserId, VersionId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("write conflict on {0}")]
    Conflict(String),

    /// Table or index not provisioned yet
    #[error("storage not ready: {0}")]
    NotReady(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One page of a cursor-paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Pass back as the cursor to continue; `None` when exhausted
    pub next_cursor: Option<Uuid>,
}

/// Outcome of one bounded batch delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchResult {
    pub deleted: usize,
    pub has_more: bool,
}

/// Back-references other skills may hold to a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkillReference {
    Canonical,
    Fork,
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    // Users and tokens
    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;
    async fn insert_user(&self, user: User) -> StoreResult<User>;
    async fn update_user(&self, user: User) -> StoreResult<User>;
    async fn insert_token(&self, token: ApiToken) -> StoreResult<()>;
    async fn list_tokens(&self, user_id: UserId) -> StoreResult<Vec<ApiToken>>;
    /// Revoke every live token of a user, returning how many were revoked
    async fn revoke_tokens(&self, user_id: UserId, now: DateTime<Utc>) -> StoreResult<usize>;

    // Skills
    async fn get_skill(&self, id: SkillId) -> StoreResult<Option<Skill>>;
    async fn get_skill_by_slug(&self, slug: &str) -> StoreResult<Option<Skill>>;
    async fn insert_skill(&self, skill: Skill) -> StoreResult<Skill>;
    async fn update_skill(&self, skill: Skill) -> StoreResult<Skill>;
    async fn delete_skill(&self, id: SkillId) -> StoreResult<bool>;
    async fn list_skills(&self, cursor: Option<Uuid>, limit: usize) -> StoreResult<Page<Skill>>;
    async fn list_skills_by_owner(
        &self,
        owner: UserId,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Page<Skill>>;
    async fn list_skills_by_owner_since(
        &self,
        owner: UserId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Skill>>;
    async fn count_skills_by_owner(&self, owner: UserId) -> StoreResult<u64>;
    async fn list_skills_by_reason(
        &self,
        reason: &str,
        cursor: Option<Uuid>,
        limit: usize,
    ) -> StoreResult<Page<Skill>>;
    async fn list_skills_referencing(
        &self,
        target: SkillId,
        reference: SkillReference,
        limit: usize,
    ) -> StoreResult<Vec<Skill>>;

    // Versions
    async fn get_version(&self, id: VersionId) -> StoreResult<Option<SkillVersion>>;
    async fn insert_version(&self, version: SkillVersion) -> StoreResult<SkillVersion>;
    async fn update_version(&self, version: SkillVersion) -> StoreResult<SkillVersion>;
    async fn list_versions(&self, skill_id: SkillId) -> StoreResult<Vec<SkillVersion>>;
    async fn list_versions_by_bundle_hash(&self, hash: &str) -> StoreResult<Vec<SkillVersion>>;
    async fn delete_versions_batch(&self, skill_id: SkillId, limit: usize)
        -> StoreResult<BatchResult>;

    // Dependent rows
    async fn insert_dependent(&self, row: DependentRow) -> StoreResult<()>;
    async fn list_dependents(
        &self,
        kind: DependentKind,
        skill_id: SkillId,
    ) -> StoreResult<Vec<DependentRow>>;
    async fn delete_dependents_batch(
        &self,
        kind: DependentKind,
        skill_id: SkillId,
        limit: usize,
    ) -> StoreResult<BatchResult>;

    // Leaderboards
    async fn insert_leaderboard(&self, leaderboard: Leaderboard) -> StoreResult<()>;
    async fn list_leaderboards_containing(
        &self,
        skill_id: SkillId,
        limit: usize,
    ) -> StoreResult<Vec<Leaderboard>>;
    async fn update_leaderboard(&self, leaderboard: Leaderboard) -> StoreResult<Leaderboard>;

    // Slug reservations and audit trail
    async fn get_slug_reservation(&self, slug: &str) -> StoreResult<Option<SlugReservation>>;
    async fn put_slug_reservation(&self, reservation: SlugReservation) -> StoreResult<()>;
    async fn insert_audit_log(&self, entry: AuditLog) -> StoreResult<()>;
    async fn list_audit_logs(&self, target_id: &str) -> StoreResult<Vec<AuditLog>>;
}

/// Backing row for the global visibility counter
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get_global_stats(&self) -> StoreResult<Option<GlobalStats>>;
    async fn put_global_stats(&self, stats: GlobalStats) -> StoreResult<()>;
    /// Apply a delta atomically; `None` when the row does not exist yet
    async fn apply_global_stats_delta(
        &self,
        delta: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<u64>>;
}

/// Sliding-window counters for the creation rate limiter
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get_rate_window(&self, key: &str) -> StoreResult<Option<RateWindow>>;
    /// Compare-and-set on `revision`; a window with revision 0 must not exist
    async fn put_rate_window(&self, window: RateWindow) -> StoreResult<RateWindow>;
}
